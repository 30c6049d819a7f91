use clap::{Parser, ValueEnum};
use hac::crypto::keyset::{KeySet, SystemKeysetError};
use hac::crypto::{AesKey, TitleKey};
use hac::filesystem::{Entry, ReadableDirectory, ReadableDirectoryExt, ReadableFile, ReadableFileSystem};
use hac::formats::hfs0::{Hfs0ParseError, HierarchicalFileSystem};
use hac::formats::nca::{
    master_key_summary, BaseSource, IntegrityCheckLevel, Nca, NcaContentType, NcaError,
    NcaSectionType,
};
use hac::formats::nca::filesystem::NcaFileSystem;
use hac::formats::pfs::{PartitionFileSystem, PfsParseError};
use hac::formats::romfs::{RomFileSystem, RomFsParseError};
use hac::formats::xci::{GameCardImage, XciParseError};
use hac::sink::{self, SinkError};
use hac::snafu::{ErrorCompat, ResultExt, Snafu};
use hac::storage::{FileRoStorage, ReadableStorage, ReadableStorageExt, StorageError};
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, Eq, PartialEq, ValueEnum)]
#[value(rename_all = "lower")]
enum Intype {
    Nca,
    Pfs0,
    Exefs,
    Romfs,
    Hfs0,
    Xci,
    Gamecard,
    Gc,
}

impl Intype {
    fn is_xci(self) -> bool {
        matches!(self, Intype::Xci | Intype::Gamecard | Intype::Gc)
    }

    fn is_pfs(self) -> bool {
        matches!(self, Intype::Pfs0 | Intype::Exefs)
    }
}

/// A hactool-style NCA/PFS0/HFS0/RomFS/XCI inspector and extractor.
#[derive(Parser)]
#[clap(version = "0.1.0")]
struct Opts {
    input: PathBuf,

    #[clap(short = 'i', long)]
    info: bool,
    #[clap(short = 'x', long)]
    extract: bool,
    #[clap(short = 'r', long)]
    raw: bool,
    #[clap(short = 'y', long)]
    verify: bool,
    #[clap(short = 'd', long)]
    dev: bool,

    #[clap(short = 't', long)]
    intype: Option<Intype>,

    #[clap(long)]
    titlekey: Option<TitleKey>,
    #[clap(long)]
    contentkey: Option<AesKey>,

    #[clap(long)]
    plaintext: Option<PathBuf>,
    #[clap(long)]
    header: Option<PathBuf>,

    #[clap(long)]
    section0: Option<PathBuf>,
    #[clap(long)]
    section1: Option<PathBuf>,
    #[clap(long)]
    section2: Option<PathBuf>,
    #[clap(long)]
    section3: Option<PathBuf>,
    #[clap(long)]
    section0dir: Option<PathBuf>,
    #[clap(long)]
    section1dir: Option<PathBuf>,
    #[clap(long)]
    section2dir: Option<PathBuf>,
    #[clap(long)]
    section3dir: Option<PathBuf>,

    #[clap(long)]
    exefs: Option<PathBuf>,
    #[clap(long)]
    romfs: Option<PathBuf>,
    #[clap(long)]
    exefsdir: Option<PathBuf>,
    #[clap(long)]
    romfsdir: Option<PathBuf>,
    #[clap(long)]
    listromfs: bool,

    #[clap(long)]
    baseromfs: Option<PathBuf>,
    #[clap(long)]
    basenca: Option<PathBuf>,

    #[clap(long)]
    outdir: Option<PathBuf>,
    #[clap(long)]
    pfs0dir: Option<PathBuf>,
    #[clap(long)]
    hfs0dir: Option<PathBuf>,
    #[clap(long)]
    rootdir: Option<PathBuf>,
    #[clap(long)]
    updatedir: Option<PathBuf>,
    #[clap(long)]
    normaldir: Option<PathBuf>,
    #[clap(long)]
    securedir: Option<PathBuf>,
}

#[derive(Snafu, Debug)]
#[snafu(crate_root(hac::snafu))]
enum CliError {
    /// Failed to load the key set
    Keyset { source: SystemKeysetError },
    /// Storage error
    Storage { source: StorageError },
    /// Failed to parse the NCA
    Nca { source: NcaError },
    /// Failed to parse the PFS0
    Pfs { source: PfsParseError },
    /// Failed to parse the RomFS
    RomFs { source: RomFsParseError },
    /// Failed to parse the HFS0
    Hfs0 { source: Hfs0ParseError },
    /// Failed to parse the XCI
    Xci { source: XciParseError },
    /// Failed to write extracted data to disk
    Sink { source: SinkError },
    /// Section {index} is not present in this NCA
    NoSuchSection { index: usize },
    /// No section of the requested type is present in this NCA
    NoSuchSectionType,
    /// {message}
    Extraction { message: String },
}

fn main() {
    tracing_subscriber::fmt::init();

    let opts = Opts::parse();

    if let Err(e) = run(opts) {
        eprintln!("Error: {}", e);
        eprintln!("Caused by:");
        for cause in e.iter_chain().skip(1) {
            eprintln!(" - {}", cause);
        }
        std::process::exit(1);
    }

    println!("Done!");
}

fn guess_intype(path: &Path) -> Intype {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pfs0") | Some("nsp") => Intype::Pfs0,
        Some("exefs") => Intype::Exefs,
        Some("romfs") => Intype::Romfs,
        Some("hfs0") => Intype::Hfs0,
        Some("xci") => Intype::Xci,
        _ => Intype::Nca,
    }
}

fn run(opts: Opts) -> Result<(), CliError> {
    let intype = opts.intype.unwrap_or_else(|| guess_intype(&opts.input));

    let do_info = opts.info || !opts.extract;
    let do_extract = opts.extract || !opts.info;

    if intype == Intype::Nca {
        run_nca(&opts, do_info, do_extract)
    } else if intype.is_pfs() {
        run_pfs(&opts, do_info, do_extract)
    } else if intype == Intype::Romfs {
        run_romfs(&opts, do_info, do_extract)
    } else if intype == Intype::Hfs0 {
        run_hfs0(&opts, do_info, do_extract)
    } else if intype.is_xci() {
        run_xci(&opts, do_info, do_extract)
    } else {
        unreachable!()
    }
}

fn load_keyset(opts: &Opts) -> Result<KeySet, CliError> {
    if opts.dev {
        KeySet::dev(None)
    } else {
        KeySet::retail(None)
    }
    .context(KeysetSnafu)
}

fn open_storage(path: &Path) -> Result<FileRoStorage, CliError> {
    FileRoStorage::open(path).context(StorageSnafu)
}

fn section_dir_opt(opts: &Opts, index: usize) -> &Option<PathBuf> {
    match index {
        0 => &opts.section0dir,
        1 => &opts.section1dir,
        2 => &opts.section2dir,
        3 => &opts.section3dir,
        _ => unreachable!(),
    }
}

fn section_file_opt(opts: &Opts, index: usize) -> &Option<PathBuf> {
    match index {
        0 => &opts.section0,
        1 => &opts.section1,
        2 => &opts.section2,
        3 => &opts.section3,
        _ => unreachable!(),
    }
}

fn run_nca(opts: &Opts, do_info: bool, do_extract: bool) -> Result<(), CliError> {
    let key_set = load_keyset(opts)?;

    let storage = open_storage(&opts.input)?;

    let nca = Nca::new_with_key_overrides(
        &key_set,
        storage,
        opts.titlekey,
        opts.contentkey,
    )
    .context(NcaSnafu)?;

    if do_info {
        println!("NCA: {}", opts.input.display());
        println!("Content type: {:?}", nca.content_type());
        println!("Plaintext: {}", nca.is_plaintext());
        println!(
            "Master Key Revision: {:#x} ({})",
            nca.master_key_revision(),
            master_key_summary(nca.master_key_revision())
        );
        if opts.verify {
            println!(
                "Fixed-key signature: {}",
                validity_tag(nca.fixed_key_signature_valid())
            );
        }
        for index in 0..4 {
            if nca.get_raw_encrypted_section_storage(index).is_none() {
                continue;
            }
            if opts.verify {
                let valid = nca
                    .get_section_storage(index, IntegrityCheckLevel::Full, None)
                    .map(|result| result.is_ok() && verify_storage_readable(&result.unwrap()));
                println!(
                    "  Section {}: {:?} {}",
                    index,
                    nca.get_section_type(index),
                    validity_tag(valid)
                );
            } else {
                println!("  Section {}: {:?}", index, nca.get_section_type(index));
            }
        }

        if opts.verify {
            if let Some(index) = (0..4).find(|&i| nca.get_section_type(i) == Some(NcaSectionType::Code)) {
                if let Some(Ok(NcaFileSystem::Pfs(pfs))) =
                    nca.get_section_fs(index, IntegrityCheckLevel::IgnoreOnInvalid, None)
                {
                    match pfs.npdm() {
                        Some(Ok(npdm)) => {
                            let acid_valid = npdm
                                .acid
                                .as_ref()
                                .and_then(|acid| acid.verify_signature(&key_set).ok());
                            println!("ACID signature: {}", validity_tag(acid_valid));
                            println!(
                                "NPDM signature: {}",
                                validity_tag(nca.verify_npdm_signature(&npdm))
                            );
                        }
                        Some(Err(e)) => {
                            tracing::warn!("failed to parse main.npdm: {}", e);
                        }
                        None => {}
                    }
                }
            }
        }
    }

    if let Some(path) = &opts.header {
        let storage = nca.get_raw_encrypted_section_storage(0);
        if let Some(storage) = storage {
            sink::write_storage_to_file(&storage, path).context(SinkSnafu)?;
        }
    }

    let base = open_base_source(opts, &key_set)?;

    if do_extract || opts.verify {
        let level = if opts.verify {
            IntegrityCheckLevel::Full
        } else {
            IntegrityCheckLevel::IgnoreOnInvalid
        };

        for index in 0..4 {
            if nca.get_raw_encrypted_section_storage(index).is_none() {
                continue;
            }

            if opts.raw {
                if let Some(dir) = section_dir_opt(opts, index) {
                    let storage = nca
                        .get_raw_encrypted_section_storage(index)
                        .ok_or(CliError::NoSuchSection { index })?;
                    sink::write_storage_to_file(&storage, dir).context(SinkSnafu)?;
                }
                if let Some(file) = section_file_opt(opts, index) {
                    let storage = nca
                        .get_raw_encrypted_section_storage(index)
                        .ok_or(CliError::NoSuchSection { index })?;
                    sink::write_storage_to_file(&storage, file).context(SinkSnafu)?;
                }
                continue;
            }

            let out_dir = section_dir_opt(opts, index).clone();
            let romfs_target = if nca.get_section_type(index) == Some(NcaSectionType::Data) {
                opts.romfsdir.clone().or_else(|| opts.romfs.clone())
            } else {
                None
            };
            let exefs_target = if nca.get_section_type(index) == Some(NcaSectionType::Code) {
                opts.exefsdir.clone().or_else(|| opts.exefs.clone())
            } else {
                None
            };

            let Some(fs_result) = nca.get_section_fs(index, level, base.clone()) else {
                continue;
            };
            let fs = fs_result.context(NcaSnafu)?;

            if opts.listromfs && nca.get_section_type(index) == Some(NcaSectionType::Data) {
                list_romfs(&fs);
            }

            if let Some(dir) = out_dir.or(romfs_target).or(exefs_target) {
                extract_fs(&fs, &dir)?;
            }
        }

        if let Some(dir) = &opts.outdir {
            if let Some(index) = (0..4).find(|&i| nca.content_type() == NcaContentType::Program && nca.get_section_type(i) == Some(NcaSectionType::Data)) {
                if let Some(fs_result) = nca.get_section_fs(index, level, base.clone()) {
                    let fs = fs_result.context(NcaSnafu)?;
                    extract_fs(&fs, dir)?;
                }
            }
        }
    }

    Ok(())
}

/// Opens the reference archive for a BKTR patch section. `BaseSource` is
/// typed over the same storage as the patch NCA itself, so a `--basenca`'s
/// decrypted RomFS section (whose storage type is a verification/crypto
/// wrapper stack, not a plain file) is first streamed out to a scratch file
/// and reopened as one, the same shape `--baseromfs` already is.
fn open_base_source(
    opts: &Opts,
    key_set: &KeySet,
) -> Result<Option<BaseSource<FileRoStorage>>, CliError> {
    if let Some(path) = &opts.basenca {
        let storage = open_storage(path)?;
        let base_nca = Nca::new(key_set, storage).context(NcaSnafu)?;
        let index = (0..4)
            .find(|&i| base_nca.get_section_type(i) == Some(NcaSectionType::Data))
            .ok_or(CliError::NoSuchSectionType)?;
        let base_storage = base_nca
            .get_section_storage(index, IntegrityCheckLevel::IgnoreOnInvalid, None)
            .ok_or(CliError::NoSuchSection { index })?
            .context(NcaSnafu)?;

        let scratch_path =
            std::env::temp_dir().join(format!("hac-base-{}.romfs", std::process::id()));
        sink::write_storage_to_file(&base_storage, &scratch_path).context(SinkSnafu)?;
        let materialized = open_storage(&scratch_path)?;
        Ok(Some(BaseSource::BaseNcaSection(materialized.shared())))
    } else if let Some(path) = &opts.baseromfs {
        let storage = open_storage(path)?;
        Ok(Some(BaseSource::Raw(storage.shared())))
    } else {
        Ok(None)
    }
}

fn run_pfs(opts: &Opts, do_info: bool, do_extract: bool) -> Result<(), CliError> {
    let storage = open_storage(&opts.input)?;
    let pfs = PartitionFileSystem::new(storage).context(PfsSnafu)?;

    if do_info {
        println!("PFS0: {}", opts.input.display());
        for entry in pfs.root().entries() {
            if let Entry::File(file) = entry {
                println!("  {} ({} bytes)", file.name(), file.size());
            }
        }
    }

    if do_extract {
        if let Some(dir) = opts.pfs0dir.clone().or_else(|| opts.outdir.clone()) {
            extract_fs(&pfs, &dir)?;
        }
    }

    Ok(())
}

fn run_romfs(opts: &Opts, do_info: bool, do_extract: bool) -> Result<(), CliError> {
    let storage = open_storage(&opts.input)?;
    let romfs = RomFileSystem::new(storage).context(RomFsSnafu)?;

    if do_info {
        println!("RomFS: {}", opts.input.display());
    }

    if opts.listromfs {
        list_romfs(&romfs);
    }

    if do_extract {
        if let Some(dir) = opts.romfsdir.clone().or_else(|| opts.outdir.clone()) {
            extract_fs(&romfs, &dir)?;
        }
    }

    Ok(())
}

fn run_hfs0(opts: &Opts, do_info: bool, do_extract: bool) -> Result<(), CliError> {
    let storage = open_storage(&opts.input)?;
    let hfs0 = HierarchicalFileSystem::new(storage).context(Hfs0Snafu)?;

    if do_info || opts.verify {
        println!("HFS0: {}", opts.input.display());
        for entry in hfs0.root().entries() {
            if let Entry::File(file) = entry {
                if opts.verify {
                    let status = match hfs0.verify_entry(file.name()) {
                        Some(true) => "(GOOD)",
                        Some(false) => "(FAIL)",
                        None => "(----)",
                    };
                    println!("  {} {}", file.name(), status);
                } else {
                    println!("  {} ({} bytes)", file.name(), file.size());
                }
            }
        }
    }

    if do_extract {
        if let Some(dir) = opts.hfs0dir.clone().or_else(|| opts.outdir.clone()) {
            extract_fs(&hfs0, &dir)?;
        }
    }

    Ok(())
}

fn run_xci(opts: &Opts, do_info: bool, do_extract: bool) -> Result<(), CliError> {
    let storage = open_storage(&opts.input)?;
    let xci = GameCardImage::new(storage).context(XciSnafu)?;

    if do_info {
        println!("XCI: {}", opts.input.display());
        println!(
            "Root partition: offset {:#x}, size {:#x}",
            xci.header().root_partition_offset(),
            xci.header().root_partition_size()
        );
    }

    if do_extract {
        if let Some(dir) = opts.rootdir.clone().or_else(|| opts.outdir.clone()) {
            extract_fs(xci.root(), &dir)?;
        }

        if let Some(dir) = &opts.updatedir {
            if let Some(update) = xci.update().context(XciSnafu)? {
                extract_fs(&update, dir)?;
            }
        }
        if let Some(dir) = &opts.normaldir {
            if let Some(normal) = xci.normal().context(XciSnafu)? {
                extract_fs(&normal, dir)?;
            }
        }
        if let Some(dir) = &opts.securedir {
            if let Some(secure) = xci.secure().context(XciSnafu)? {
                extract_fs(&secure, dir)?;
            }
        }
    }

    Ok(())
}

fn validity_tag(valid: Option<bool>) -> &'static str {
    match valid {
        Some(true) => "(GOOD)",
        Some(false) => "(FAIL)",
        None => "(----)",
    }
}

/// Reads a storage end to end so every block underneath a `Full`-level
/// integrity wrapper gets hashed and checked.
fn verify_storage_readable<S: ReadableStorage>(storage: &S) -> bool {
    let mut buf = [0u8; 0x10000];
    let size = storage.get_size();
    let mut offset = 0u64;

    while offset < size {
        let chunk = std::cmp::min(buf.len() as u64, size - offset) as usize;
        if storage.read(offset, &mut buf[..chunk]).is_err() {
            return false;
        }
        offset += chunk as u64;
    }

    true
}

fn list_romfs<FS: ReadableFileSystem>(fs: &FS) {
    for (path, entry) in fs.root().entries_recursive() {
        if let Entry::File(_) = entry {
            println!("rom:{}", path);
        }
    }
}

fn extract_fs<FS: ReadableFileSystem>(fs: &FS, out_dir: &Path) -> Result<(), CliError> {
    extract_directory(fs.root(), out_dir)
}

fn extract_directory<D: ReadableDirectory>(dir: D, out_dir: &Path) -> Result<(), CliError> {
    sink::mkdir_p(out_dir).context(SinkSnafu)?;

    for entry in dir.entries() {
        match entry {
            Entry::File(file) => {
                let storage = file.storage().map_err(|e| CliError::Extraction {
                    message: format!("opening {}: {}", file.name(), e),
                })?;
                let path = out_dir.join(file.name());
                println!("Saving {}...", path.display());
                sink::write_storage_to_file(&storage, &path).context(SinkSnafu)?;
            }
            Entry::Directory(subdir) => {
                let path = out_dir.join(subdir.name());
                extract_directory(subdir, &path)?;
            }
        }
    }

    Ok(())
}
