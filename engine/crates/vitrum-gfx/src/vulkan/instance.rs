use std::{
    collections::HashSet,
    ffi::{CStr, CString, c_char},
};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxError, GfxResult, VkResultExt},
    vulkan::debug_messenger::GfxDebugMsger,
};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct GfxInstance {
    pub(crate) ash_instance: ash::Instance,
    /// 是否开启了 validation layer
    pub(crate) validation: bool,
}

// new & init
impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    pub fn new(vk_entry: &ash::Entry, app_name: &str, extra_instance_exts: &[*const c_char]) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxInstance::new");

        let app_name = CString::new(app_name).unwrap_or_default();
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_ref())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"Vitrum")
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let enabled_extensions = Self::get_extensions(vk_entry, extra_instance_exts)?;
        let mut enabled_extensions_str = String::new();
        for ext in &enabled_extensions {
            enabled_extensions_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("instance extensions: {}", enabled_extensions_str);

        let enabled_layers = Self::get_layers(vk_entry)?;
        log::info!("instance layers: {:?}", enabled_layers);
        let validation = enabled_layers.contains(&VALIDATION_LAYER);
        let enabled_layers = enabled_layers.iter().map(|layer| layer.as_ptr()).collect_vec();

        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers);

        // 为 instance info 添加 debug messenger，覆盖 instance 的创建和销毁过程
        let mut debug_utils_messenger_ci = GfxDebugMsger::debug_utils_messenger_ci();
        instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);

        let ash_instance = unsafe { vk_entry.create_instance(&instance_ci, None) }.vk_call("vkCreateInstance")?;

        Ok(Self {
            ash_instance,
            validation,
        })
    }
}

// destroy
impl GfxInstance {
    pub fn destroy(self) {
        log::info!("destroying instance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

// getters
impl GfxInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }
}

// 构造过程的辅助函数
impl GfxInstance {
    /// instance 所需的，且受支持的 extension
    fn get_extensions(vk_entry: &ash::Entry, extra_instance_exts: &[*const c_char]) -> GfxResult<Vec<*const c_char>> {
        let all_ext_props = unsafe { vk_entry.enumerate_instance_extension_properties(None) }
            .vk_call("vkEnumerateInstanceExtensionProperties")?;
        let mut enabled_extensions: HashSet<&CStr> = HashSet::new();

        let required = extra_instance_exts
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(*ext) })
            .chain(Self::basic_instance_exts())
            .collect_vec();
        for ext in required {
            let supported = all_ext_props
                .iter()
                .any(|supported_ext| supported_ext.extension_name_as_c_str().is_ok_and(|name| name == ext));
            if !supported {
                return Err(GfxError::Unsupported {
                    kind: "instance extension",
                    name: ext.to_string_lossy().into_owned(),
                });
            }
            enabled_extensions.insert(ext);
        }

        Ok(enabled_extensions.iter().map(|ext| ext.as_ptr()).collect_vec())
    }

    /// debug 构建时尝试开启 validation layer，不可用时只给出警告
    fn get_layers(vk_entry: &ash::Entry) -> GfxResult<Vec<&'static CStr>> {
        if !cfg!(debug_assertions) {
            return Ok(vec![]);
        }

        let all_layer_props =
            unsafe { vk_entry.enumerate_instance_layer_properties() }.vk_call("vkEnumerateInstanceLayerProperties")?;
        let is_layer_supported = all_layer_props
            .iter()
            .any(|available_layer| available_layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));

        if is_layer_supported {
            Ok(vec![VALIDATION_LAYER])
        } else {
            log::warn!("validation layer {:?} is not available", VALIDATION_LAYER);
            Ok(vec![])
        }
    }

    /// 必须要开启的 instance extensions
    fn basic_instance_exts() -> Vec<&'static CStr> {
        // debug utils 可以单独使用：
        // 1. debug messenger
        // 2. 为 vulkan object 设置 debug name
        // 3. 使用 label 标记 command buffer 中的 section
        vec![vk::EXT_DEBUG_UTILS_NAME]
    }
}
