/// Hidden per-project directory holding build output and build state.
pub const PROJECT_DATA_DIR: &str = ".starforge";

/// Project manifest file name.
pub const MANIFEST_FILENAME: &str = "project.toml";

/// Owned asset directory, relative to the project root.
pub const ASSETS_DIR: &str = "assets";

/// Default number of concurrent asset tasks.
pub const DEFAULT_PARALLELISM: usize = 32;

/// Default file watcher debounce window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Linker symbol marking where the archive chain starts in the base image.
pub const ARCHIVE_ROM_START_SYMBOL: &str = "mapfs_ROM_START";

/// Archive chain start used when no symbol file is available.
pub const DEFAULT_ROM_START: u32 = 0x1E4_0000;

/// Build output directory, relative to the project data dir.
pub const BUILD_DIR: &str = "build";

/// Generated headers, relative to the build dir.
pub const HEADERS_DIR: &str = "headers";

/// Build state directory, relative to the project data dir.
pub const BUILD_STATE_DIR: &str = "build-state";

/// Build state file name.
pub const BUILD_STATE_FILENAME: &str = "state.json";

/// Archive file name inside the build dir and inside packages.
pub const ARCHIVE_FILENAME: &str = "assets.bin";

/// Target descriptor file name inside packages.
pub const TARGET_FILENAME: &str = "target.json";

/// Extension of distribution packages.
pub const PACKAGE_EXTENSION: &str = "tar.gz";
