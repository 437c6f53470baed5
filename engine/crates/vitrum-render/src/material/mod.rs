pub mod category;
pub mod constants;
pub mod material_desc;
pub mod material_system;
