pub mod sessions;
pub mod vehicles;
