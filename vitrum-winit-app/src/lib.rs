pub mod app;
pub mod demo_scene;
pub mod frame_timing;
pub mod input_state;
pub mod orbit_camera;
