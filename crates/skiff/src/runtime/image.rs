//! Saving container filesystems as archives and importing them as images.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use skiff_common::{SkiffError, SkiffPaths, SkiffResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Pack the merged root of container `name` into a gzip'd tarball at
/// `output`.
///
/// # Errors
///
/// Returns [`SkiffError::ContainerNotFound`] if the container has no
/// mounted root, or an I/O error while archiving.
pub fn commit(paths: &SkiffPaths, name: &str, output: &Path) -> SkiffResult<()> {
    let mnt = paths.container_mnt(name);
    if !mnt.is_dir() {
        return Err(SkiffError::ContainerNotFound {
            name: name.to_string(),
        });
    }

    let file = File::create(output).map_err(|e| SkiffError::os("create", output, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", &mnt)
        .map_err(|e| SkiffError::os("archive", &mnt, e))?;
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(|e| SkiffError::os("write", output, e))?;

    tracing::info!(name, output = %output.display(), "Container committed");
    Ok(())
}

/// Unpack `archive` (plain or gzip'd tar) as image `image`.
///
/// # Errors
///
/// Returns [`SkiffError::ImageExists`] if the image directory is already
/// there, or an I/O error. A partially unpacked image is removed.
pub fn load(paths: &SkiffPaths, archive: &Path, image: &str) -> SkiffResult<()> {
    let target = paths.image(image);
    if target.exists() {
        return Err(SkiffError::ImageExists {
            image: image.to_string(),
        });
    }

    let mut file = File::open(archive).map_err(|e| SkiffError::os("open", archive, e))?;
    let gzipped = is_gzip(&mut file).map_err(|e| SkiffError::os("read", archive, e))?;
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    std::fs::create_dir_all(&target).map_err(|e| SkiffError::os("mkdir", &target, e))?;

    let mut tarball = tar::Archive::new(reader);
    tarball.set_preserve_permissions(true);
    if let Err(e) = tarball.unpack(&target) {
        if let Err(cleanup) = std::fs::remove_dir_all(&target) {
            tracing::warn!(image, error = %cleanup, "Failed to remove partial image");
        }
        return Err(SkiffError::os("unpack", archive, e));
    }

    tracing::info!(image, archive = %archive.display(), gzipped, "Image loaded");
    Ok(())
}

fn is_gzip(file: &mut File) -> std::io::Result<bool> {
    let mut magic = [0u8; 2];
    let gzipped = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e),
    };
    file.seek(SeekFrom::Start(0))?;
    Ok(gzipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fake_mount(paths: &SkiffPaths, name: &str) {
        let mnt = paths.container_mnt(name);
        std::fs::create_dir_all(mnt.join("etc")).unwrap();
        std::fs::write(mnt.join("etc/hostname"), "web\n").unwrap();
    }

    #[test]
    fn commit_then_load() {
        let temp = tempdir().unwrap();
        let paths = SkiffPaths::with_root(temp.path());
        fake_mount(&paths, "web");

        let archive = temp.path().join("web.tar.gz");
        commit(&paths, "web", &archive).unwrap();

        let mut head = [0u8; 2];
        File::open(&archive).unwrap().read_exact(&mut head).unwrap();
        assert_eq!(head, GZIP_MAGIC);

        load(&paths, &archive, "web-image").unwrap();
        assert_eq!(
            std::fs::read_to_string(paths.image("web-image").join("etc/hostname")).unwrap(),
            "web\n"
        );
    }

    #[test]
    fn load_plain_tar() {
        let temp = tempdir().unwrap();
        let paths = SkiffPaths::with_root(temp.path());

        let archive = temp.path().join("plain.tar");
        let mut builder = tar::Builder::new(File::create(&archive).unwrap());
        let mut header = tar::Header::new_gnu();
        header.set_size(3);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "bin/hi", &b"hi\n"[..]).unwrap();
        builder.into_inner().unwrap();

        load(&paths, &archive, "plain").unwrap();
        assert!(paths.image("plain").join("bin/hi").is_file());
    }

    #[test]
    fn load_refuses_existing_image() {
        let temp = tempdir().unwrap();
        let paths = SkiffPaths::with_root(temp.path());
        std::fs::create_dir_all(paths.image("busybox")).unwrap();

        let err = load(&paths, &temp.path().join("whatever.tar"), "busybox").unwrap_err();
        assert!(matches!(err, SkiffError::ImageExists { .. }));
    }

    #[test]
    fn commit_needs_a_mounted_root() {
        let temp = tempdir().unwrap();
        let paths = SkiffPaths::with_root(temp.path());
        let err = commit(&paths, "ghost", &temp.path().join("out.tar.gz")).unwrap_err();
        assert!(matches!(err, SkiffError::ContainerNotFound { .. }));
    }

    #[test]
    fn garbage_archive_leaves_no_image() {
        let temp = tempdir().unwrap();
        let paths = SkiffPaths::with_root(temp.path());
        let archive = temp.path().join("bad.tar.gz");
        std::fs::write(&archive, [0x1f, 0x8b, 0, 1, 2, 3]).unwrap();

        assert!(load(&paths, &archive, "bad").is_err());
        assert!(!paths.image("bad").exists());
    }
}
