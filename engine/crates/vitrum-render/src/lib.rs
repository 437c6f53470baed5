//! Vitrum 的渲染核心
//!
//! - [`frame_scheduler`]：K 个 frame slot 的 acquire / record / submit / present 循环
//! - [`swapchain_lifecycle`]：swapchain 及其依赖资源的创建和重建
//! - [`descriptor_binding`]：descriptor pool、set layout 和批量写入
//! - [`material`]：材质分类、constants 打包、管线选择
//! - [`transmission`]：深度剥离的透射合成
//! - [`renderer::Renderer`]：把以上部分按依赖顺序组装起来

pub mod config;
pub mod descriptor_binding;
pub mod draw_context;
pub mod error;
pub mod frame_counter;
pub mod frame_scheduler;
pub mod global_uniforms;
pub mod material;
pub mod per_frame_buffer;
pub mod renderer;
pub mod swapchain_lifecycle;
pub mod transmission;
pub mod vertex;

#[doc(hidden)]
pub use tracy_client as __tracy;

/// 仅在 tracy client 已经启动时记录 span，测试中不会启动 client
#[macro_export]
macro_rules! profile_span {
    ($name:literal) => {
        $crate::__tracy::Client::running().map(|client| client.span($crate::__tracy::span_location!($name), 0))
    };
}
