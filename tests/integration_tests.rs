#[cfg(all(target_os = "macos", feature = "integration_tests"))]
#[macro_use]
extern crate log;

#[cfg(all(target_os = "macos", feature = "integration_tests"))]
mod integration {
    use std::collections::HashSet;
    use std::io;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use anyhow::{bail, Result};
    use hexplay::HexViewBuilder;
    use walkdir::WalkDir;

    use mach_linkedit::{Detag, Error, Image, LoadCommand, LoadOptions, MachCommand, MachFile, MmapSource};

    const SYSTEM_BINARY_PATH: &[&str] = &[
        "/bin",
        "/sbin",
        "/usr/bin",
        "/usr/sbin",
        "/usr/libexec",
        "/usr/local/bin",
        "/usr/local/sbin",
    ];

    const SYSTEM_LIBRARY_PATH: &[&str] = &["/usr/lib", "/usr/local/lib"];

    const SYSTEM_FRAMEWORK_PATH: &[&str] = &["/System/Library/Frameworks", "/Library/Frameworks"];

    fn load_mach_file(path: &Path) -> Result<()> {
        match MmapSource::open(path) {
            Ok(source) => {
                if source.as_bytes().starts_with(b"#") {
                    trace!("skip the scripts, {:?}", path);

                    return Ok(());
                }

                let file = match MachFile::parse(Arc::new(source)) {
                    Ok(file) => file,
                    Err(Error::UnsupportedFiletype(magic)) => {
                        trace!("skip {:?} with magic 0x{:08x}", path, magic);

                        return Ok(());
                    }
                    Err(err) => bail!("parse {:?}, {}", path, err),
                };

                let opts = LoadOptions::default().detag(Detag::Auto);

                for image in file.images(&opts) {
                    verify_image(&image?);
                }

                trace!("loaded {:?}", path);

                Ok(())
            }
            Err(Error::IoError(ref err)) if err.kind() == io::ErrorKind::PermissionDenied => {
                trace!("ignore the permission denied, {:?}", path);

                Ok(())
            }
            Err(err) => bail!(err),
        }
    }

    fn verify_image(image: &Image) {
        for &MachCommand(ref cmd, cmdsize) in &image.commands {
            if let LoadCommand::Command { cmd, ref payload } = *cmd {
                warn!(
                    "unsolved command #{} with {} bytes:\n{}",
                    cmd,
                    cmdsize,
                    HexViewBuilder::new(payload).finish()
                );
            }
        }

        for diag in &image.diagnostics {
            warn!("{}", diag);
        }

        for bind in &image.binds {
            trace!("{} {} @ 0x{:x}", bind.library, bind.symbol, bind.address);
        }
    }

    fn walk<F>(roots: &[&str], max_depth: usize, filter: F)
    where
        F: Fn(&Path, &std::fs::Metadata) -> bool,
    {
        let mut files = HashSet::<PathBuf>::new();

        for root in roots.iter().map(Path::new).filter(|path| path.is_dir()) {
            trace!("walk directory: {:?}", root);

            for entry in WalkDir::new(root)
                .follow_links(true)
                .max_depth(max_depth)
                .into_iter()
                .filter_map(|entry| entry.ok())
            {
                let path = entry.path();
                let metadata = match entry.metadata() {
                    Ok(metadata) if metadata.is_file() => metadata,
                    _ => continue,
                };

                if files.insert(path.to_owned()) && filter(path, &metadata) {
                    load_mach_file(path).unwrap_or_else(|err| panic!("load file: {:?}, {}", path, err));
                }
            }
        }
    }

    #[test]
    fn test_system_binaries() {
        let _ = pretty_env_logger::try_init();

        walk(SYSTEM_BINARY_PATH, 1, |_, metadata| {
            (metadata.permissions().mode() & 0o111) != 0
        });
    }

    #[test]
    fn test_system_libraries() {
        let _ = pretty_env_logger::try_init();

        walk(SYSTEM_LIBRARY_PATH, 1, |path, _| {
            matches!(path.extension().and_then(|ext| ext.to_str()), Some("dylib") | Some("so"))
        });
    }

    #[test]
    fn test_system_frameworks() {
        let _ = pretty_env_logger::try_init();

        walk(SYSTEM_FRAMEWORK_PATH, 3, |path, metadata| {
            path.extension().is_none() && (metadata.permissions().mode() & 0o111) != 0
        });
    }
}
