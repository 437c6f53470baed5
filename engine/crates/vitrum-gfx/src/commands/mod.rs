pub mod barrier;
pub mod rendering_info;
pub mod submit_info;
