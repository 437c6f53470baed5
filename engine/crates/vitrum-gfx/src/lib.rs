//! Vitrum 的 GFX 层
//!
//! 渲染核心只依赖 [`GfxBackend`] 这一组能力接口（创建 buffer/image、提交命令、呈现），
//! 所有 GPU 对象都以 slotmap 句柄的形式在上层流转。
//!
//! - [`vulkan::VulkanBackend`]：唯一的真实实现，基于 ash + vk-mem
//! - `mock::MockGfx`：仅用于测试，记录所有调用并模拟 fence 状态

pub mod backend;
pub mod commands;
pub mod descriptors;
pub mod error;
pub mod handles;
pub mod pipelines;
pub mod query;
pub mod resources;
pub mod stats;
pub mod swapchain;
pub mod vulkan;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use backend::{
    GfxBackend, GfxCommands, GfxDescriptors, GfxDeviceLimits, GfxPipelines, GfxPresent, GfxQueries, GfxResources,
    GfxSync,
};
pub use error::{GfxError, GfxResult};
pub use handles::*;

/// 重新导出 ash，保证上层使用的 vk 类型版本一致
pub use ash::vk;
