pub mod app_paths;
#[cfg(test)]
pub mod fixtures;
pub mod logging;
pub mod result_file;
