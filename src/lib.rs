pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod import;
pub mod memory;
pub mod scan;
pub mod sink;
pub mod slideshow;
pub mod tasks {
    pub mod importer;
    pub mod slideshow;
}
