pub mod catalog;
pub mod hsv;
pub mod term_map;

pub use catalog::{TermMapAsset, TermMapCatalog, TermMapDescriptor};
pub use hsv::{rgb_to_hsv, HsvImage};
pub use term_map::{TermMap, TermMapInfo};
