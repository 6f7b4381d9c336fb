//! The preprocessing front end a scan runs.

mod condition;
mod header_search;
mod macros;
mod module_map;
mod preprocessor;

pub use condition::{HasInclude, evaluate};
pub use header_search::{DirKind, FoundHeader, HeaderSearch, SearchDir};
pub use macros::{MacroDef, MacroTable, parse_define};
pub use module_map::{HeaderKind, ModuleHeader, ModuleInfo, ModuleMapRegistry};
pub use preprocessor::{MAX_INCLUDE_DEPTH, Preprocessor, PreprocessorCallbacks};
