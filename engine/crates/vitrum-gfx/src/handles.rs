//! GPU 对象句柄
//!
//! 使用 slotmap 的代际索引作为句柄：拷贝廉价，销毁后旧句柄会失效而不是悬垂。

slotmap::new_key_type! {
    pub struct GfxBufferHandle;
    pub struct GfxImageHandle;
    pub struct GfxImageViewHandle;
    pub struct GfxSamplerHandle;

    pub struct GfxFenceHandle;
    pub struct GfxSemaphoreHandle;
    pub struct GfxCommandBufferHandle;

    pub struct GfxDescriptorPoolHandle;
    pub struct GfxDescriptorSetLayoutHandle;
    pub struct GfxDescriptorSetHandle;

    pub struct GfxPipelineLayoutHandle;
    pub struct GfxPipelineHandle;

    pub struct GfxQueryPoolHandle;
    pub struct GfxSwapchainHandle;
}
