//! Board profiles and the static board catalog

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// How source for a board is turned into something runnable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerKind {
    /// Compiled by the native toolchain scripts (arduino-cli under the hood)
    Native,
    /// Linted and pushed to an on-device interpreter
    Interpreted,
}

/// Microcontroller family, selects the tool family and argument shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McuFamily {
    Avr,
    #[serde(rename = "cortexm0")]
    CortexM0,
    Xtensa,
}

impl McuFamily {
    /// Lower-case token used in family-specific script names
    pub fn slug(&self) -> &'static str {
        match self {
            McuFamily::Avr => "avr",
            McuFamily::CortexM0 => "cortexm0",
            McuFamily::Xtensa => "xtensa",
        }
    }
}

impl std::fmt::Display for McuFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// Static descriptor of a supported board target.
///
/// Loaded once from the embedded catalog; the dispatcher only ever borrows
/// profiles, it never owns or mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardProfile {
    /// Catalog key, e.g. "uno"
    pub id: String,
    /// Microcontroller family
    pub mcu_family: McuFamily,
    /// Native toolchain or on-device interpreter
    pub compiler_kind: CompilerKind,
    /// Baud rate handed to the uploader/runner
    pub upload_speed: u32,
    /// Toolchain build target (FQBN for native boards)
    pub build_target: String,
    /// Volume label for boards flashed through a mounted filesystem
    #[serde(default)]
    pub volume_label: Option<String>,
}

impl BoardProfile {
    /// Constrained native family: flashed via family batch scripts, the
    /// flashing tool auto-discovers the target (no port argument).
    pub fn is_constrained(&self) -> bool {
        self.compiler_kind == CompilerKind::Native && self.mcu_family == McuFamily::CortexM0
    }

    /// Memory-mapped interpreted family: flashed by merging the source into
    /// a prebuilt firmware image and copying it onto a mounted volume.
    pub fn is_memory_mapped(&self) -> bool {
        self.compiler_kind == CompilerKind::Interpreted && self.mcu_family == McuFamily::CortexM0
    }
}

const CATALOG_JSON: &str = include_str!("../../assets/boards.json");

static CATALOG: OnceLock<HashMap<String, BoardProfile>> = OnceLock::new();

/// The full board catalog, keyed by board id.
pub fn board_catalog() -> &'static HashMap<String, BoardProfile> {
    CATALOG.get_or_init(|| {
        let profiles: Vec<BoardProfile> =
            serde_json::from_str(CATALOG_JSON).expect("embedded board catalog is valid JSON");
        profiles.into_iter().map(|p| (p.id.clone(), p)).collect()
    })
}

/// Look up a single board profile by id.
pub fn board_profile(id: &str) -> Option<&'static BoardProfile> {
    board_catalog().get(id)
}
