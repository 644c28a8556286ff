//! Deflate-compressed ZIP archives of a job's output directory.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;

use anyhow::Context;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::staged_pipeline::Packager;

/// [`Packager`] that writes `src` into a ZIP file at `dest`.
///
/// Entry names are relative to `src` and use `/` separators. Empty
/// directories are kept as directory entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipPackager;

impl Packager for ZipPackager {
    fn package(&self, src: &Path, dest: &Path) -> anyhow::Result<()> {
        let file = File::create(dest).with_context(|| format!("creating {}", dest.display()))?;
        let mut writer = ZipWriter::new(BufWriter::new(file));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut pending = vec![src.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .with_context(|| format!("reading {}", dir.display()))?
                .collect::<io::Result<Vec<_>>>()?;
            entries.sort_by_key(fs::DirEntry::file_name);

            for entry in entries {
                let path = entry.path();
                let name = entry_name(src, &path)?;
                if entry.file_type()?.is_dir() {
                    writer.add_directory(format!("{name}/"), options)?;
                    pending.push(path);
                } else {
                    writer.start_file(name, options)?;
                    let mut input =
                        File::open(&path).with_context(|| format!("opening {}", path.display()))?;
                    io::copy(&mut input, &mut writer)?;
                }
            }
        }

        writer.finish()?;
        Ok(())
    }
}

fn entry_name(root: &Path, path: &Path) -> anyhow::Result<String> {
    let relative = path.strip_prefix(root)?;
    let parts = relative
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .with_context(|| format!("non UTF-8 path {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn archives_nested_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("output");
        fs::create_dir_all(src.join("images")).unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();
        fs::write(src.join("document.md"), "# Title\n").unwrap();
        fs::write(src.join("images").join("page-1.png"), [0x89, b'P', b'N', b'G']).unwrap();
        let dest = dir.path().join("result.zip");

        ZipPackager.package(&src, &dest).unwrap();

        let mut archive = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut names: Vec<_> = archive.file_names().map(str::to_owned).collect();
        names.sort();
        assert_eq!(
            names,
            ["document.md", "empty/", "images/", "images/page-1.png"]
        );

        let mut markdown = String::new();
        archive
            .by_name("document.md")
            .unwrap()
            .read_to_string(&mut markdown)
            .unwrap();
        assert_eq!(markdown, "# Title\n");
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ZipPackager
            .package(&dir.path().join("absent"), &dir.path().join("result.zip"))
            .unwrap_err();
        assert!(err.to_string().contains("reading"), "{err}");
    }
}
