//! 透射材质的 depth peeling 合成
//!
//! 只有当帧中存在 transmissive draw item 时才会被调用：先把 opaque 画到离屏 target，
//! 再逐层剥离最近的透射表面，最后从后往前混合回离屏 target，并写回主 pass。

pub mod compositor;
pub mod layer_set;
