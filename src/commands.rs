//! Implementation of each subcommand.
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};

use parc::archive::MergeReport;
use parc::format::detect_layout;
use parc::repacker::{ArchiveRepacker, ValidationReport};
use parc::{Archive, ArchiveError, ArchiveLayout, BackendKind};
use pcore::hash::to_hex;
use pcore::source::FileSource;

use crate::cli::{CliError, Config};

fn read_file(path: &Path) -> Result<Bytes, CliError> {
    Ok(Bytes::from(std::fs::read(path)?))
}

fn in_file<T>(path: &Path, result: parc::Result<T>) -> Result<T, CliError> {
    result.map_err(|source| CliError::File {
        path: path.to_path_buf(),
        source,
    })
}

fn load_archive(path: &Path, config: &Config) -> Result<Archive, CliError> {
    let data = read_file(path)?;
    in_file(path, Archive::decode(&data, config.content_version))
}

/// Opens a block layout repacker, stream archives are converted in memory.
fn open_repacker(path: &Path, config: &Config) -> Result<ArchiveRepacker, CliError> {
    let source = FileSource::open(path)?;
    let repacker = match ArchiveRepacker::new(Arc::new(source)) {
        Err(ArchiveError::WrongLayout(_)) => {
            info!("{}: converting stream archive to blocks", path.display());
            let archive = load_archive(path, config)?;
            let data = in_file(path, archive.encode(ArchiveLayout::Blocks))?;
            in_file(path, ArchiveRepacker::from_bytes(Bytes::from(data)))?
        }
        result => in_file(path, result)?,
    };

    if let Some(expected) = config.content_version {
        if repacker.content_version() != expected {
            return Err(CliError::File {
                path: path.to_path_buf(),
                source: ArchiveError::ContentVersionMismatch {
                    found: repacker.content_version(),
                    expected,
                },
            });
        }
    }
    Ok(repacker)
}

/// Writes `output` through a tempfile in the same directory so an input can
/// also be the output.
fn write_output<F>(output: &Path, write: F) -> Result<usize, CliError>
where
    F: FnOnce(&mut File) -> parc::Result<usize>,
{
    let dir = match output.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let written = in_file(output, write(tmp.as_file_mut()))?;
    tmp.as_file_mut().flush()?;
    tmp.persist(output).map_err(|e| e.error)?;

    debug!("wrote {} bytes to {}", written, output.display());
    Ok(written)
}

pub fn info(path: &Path, config: &Config) -> Result<String, CliError> {
    let data = read_file(path)?;
    let layout = detect_layout(&data);
    let archive = in_file(path, Archive::decode(&data, config.content_version))?;
    let fingerprint = in_file(path, archive.fingerprint())?;

    let mut out = format!(
        "{} ({} layout, {} bytes)\n  fingerprint {}\n",
        path.display(),
        layout.map_or("unknown", ArchiveLayout::name),
        data.len(),
        to_hex(&fingerprint)
    );
    out.push_str(&archive.describe());
    Ok(out)
}

pub fn validate(path: &Path, config: &Config) -> Result<ValidationReport, CliError> {
    let repacker = open_repacker(path, config)?;
    let report = repacker.validate();
    if report.is_ok() {
        // Offsets are sound, check the content decodes as well
        load_archive(path, config)?;
    }
    Ok(report)
}

pub fn strip(input: &Path, output: &Path, backends: &[BackendKind], config: &Config) -> Result<usize, CliError> {
    let mut repacker = open_repacker(input, config)?;
    for backend in backends {
        if !repacker.backend_present(*backend) {
            warn!("{}: no {} data to remove", input.display(), backend);
        }
        in_file(input, repacker.remove_backend(*backend))?;
    }
    write_output(output, |file| repacker.serialize(file))
}

pub fn append(
    input: &Path,
    donor: &Path,
    output: &Path,
    backends: &[BackendKind],
    config: &Config,
) -> Result<usize, CliError> {
    let mut repacker = open_repacker(input, config)?;
    let donor_repacker = open_repacker(donor, config)?;
    for backend in backends {
        in_file(donor, repacker.append_backend(&donor_repacker, *backend))?;
    }

    let report = repacker.validate();
    if !report.is_ok() {
        return Err(CliError::Invalid(output.to_path_buf()));
    }
    write_output(output, |file| repacker.serialize(file))
}

pub fn merge(inputs: &[PathBuf], output: &Path, layout: ArchiveLayout, config: &Config) -> Result<MergeReport, CliError> {
    let mut merged: Option<Archive> = None;
    let mut total = MergeReport::default();
    for path in inputs {
        let archive = load_archive(path, config)?;
        match merged.as_mut() {
            None => {
                total.added += archive.resource_count();
                merged = Some(archive);
            }
            Some(merged) => {
                let report = in_file(path, merged.merge_from(&archive))?;
                info!(
                    "{}: {} added, {} duplicates, {} conflicts",
                    path.display(),
                    report.added,
                    report.duplicates,
                    report.conflicts.len()
                );
                total.added += report.added;
                total.duplicates += report.duplicates;
                total.conflicts.extend(report.conflicts);
            }
        }
    }

    let mut merged = merged.unwrap_or_default();
    if let Some(version) = config.content_version {
        merged.content_version = version;
    }
    if let Some(build_id) = config.build_id.as_ref() {
        merged.build_id = Some(build_id.clone());
    }
    write_output(output, |file| merged.write_to(file, layout))?;
    Ok(total)
}

pub fn convert(input: &Path, output: &Path, layout: ArchiveLayout, config: &Config) -> Result<usize, CliError> {
    let archive = load_archive(input, config)?;
    write_output(output, |file| archive.write_to(file, layout))
}

#[cfg(test)]
mod test_commands {
    use super::*;
    use crate::cli::LayoutArg;
    use parc::payload::encode_indices;
    use parc::{ResourceData, ResourceKey, ResourceKind};
    use pcore::data::SerializedData;

    fn sample(name: &str, common: u8) -> Archive {
        let mut archive = Archive::new(2);
        let key = ResourceKey::named(ResourceKind::ComputePipeline, name).unwrap();
        let mut pso = ResourceData::new(SerializedData::new(vec![common; 6]));
        for (backend, code) in [(BackendKind::Vulkan, 0x70), (BackendKind::D3D12, 0xD0)] {
            let idx = archive.add_shader(backend, SerializedData::new(vec![code; 12]));
            pso.set_backend(backend, encode_indices(&[idx]));
        }
        archive.insert(key, pso).unwrap();
        archive
    }

    fn write_sample(dir: &Path, file: &str, archive: &Archive, layout: ArchiveLayout) -> PathBuf {
        let path = dir.join(file);
        std::fs::write(&path, archive.encode(layout).unwrap()).unwrap();
        path
    }

    fn config() -> Config {
        Config {
            content_version: Some(2),
            ..Config::default()
        }
    }

    #[test]
    fn info_lists_resources() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "a.bin", &sample("P", 1), ArchiveLayout::Blocks);

        let text = info(&path, &config()).unwrap();
        assert!(text.contains("blocks layout"));
        assert!(text.contains("Compute Pipeline (1)"));
    }

    #[test]
    fn strip_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "a.bin", &sample("P", 1), ArchiveLayout::Stream);

        strip(&path, &path, &[BackendKind::Vulkan], &config()).unwrap();

        let mut expected = sample("P", 1);
        expected.remove_backend(BackendKind::Vulkan);
        assert_eq!(load_archive(&path, &config()).unwrap(), expected);
        assert!(validate(&path, &config()).unwrap().is_ok());
    }

    #[test]
    fn strip_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let full = write_sample(dir.path(), "full.bin", &sample("P", 1), ArchiveLayout::Blocks);
        let stripped = dir.path().join("stripped.bin");
        let restored = dir.path().join("restored.bin");

        strip(&full, &stripped, &[BackendKind::D3D12], &config()).unwrap();
        append(&stripped, &full, &restored, &[BackendKind::D3D12], &config()).unwrap();

        assert_eq!(load_archive(&restored, &config()).unwrap(), sample("P", 1));
    }

    #[test]
    fn append_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sample(dir.path(), "a.bin", &sample("P", 1), ArchiveLayout::Blocks);
        let b = write_sample(dir.path(), "b.bin", &sample("Q", 1), ArchiveLayout::Blocks);

        let err = append(&a, &b, &dir.path().join("c.bin"), &[BackendKind::Vulkan], &config()).unwrap_err();
        assert!(matches!(
            err,
            CliError::File {
                source: ArchiveError::BackendMismatch(_),
                ..
            }
        ));
    }

    #[test]
    fn merge_archives() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sample(dir.path(), "a.bin", &sample("P", 1), ArchiveLayout::Stream);
        let b = write_sample(dir.path(), "b.bin", &sample("Q", 1), ArchiveLayout::Blocks);
        let c = write_sample(dir.path(), "c.bin", &sample("P", 9), ArchiveLayout::Stream);
        let output = dir.path().join("merged.bin");

        let config = Config {
            layout: LayoutArg::Blocks,
            build_id: Some("nightly".to_string()),
            ..config()
        };
        let report = merge(&[a, b, c], &output, config.layout.into(), &config).unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.conflicts.len(), 1);

        let merged = load_archive(&output, &config).unwrap();
        assert_eq!(merged.resource_count(), 2);
        assert_eq!(merged.shader_pool(BackendKind::Vulkan).len(), 1);
        assert_eq!(merged.build_id.as_deref(), Some("nightly"));
    }

    #[test]
    fn content_version_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "a.bin", &sample("P", 1), ArchiveLayout::Blocks);
        let config = Config {
            content_version: Some(3),
            ..Config::default()
        };

        assert!(info(&path, &config).is_err());
        assert!(validate(&path, &config).is_err());
    }

    #[test]
    fn convert_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "a.bin", &sample("P", 1), ArchiveLayout::Stream);
        let output = dir.path().join("b.bin");

        convert(&path, &output, ArchiveLayout::Blocks, &config()).unwrap();

        let data = std::fs::read(&output).unwrap();
        assert_eq!(detect_layout(&data), Some(ArchiveLayout::Blocks));
        assert_eq!(load_archive(&output, &config()).unwrap(), sample("P", 1));
    }
}
