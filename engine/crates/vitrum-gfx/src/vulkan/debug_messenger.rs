use std::ffi::CStr;

use ash::vk;

use crate::error::{GfxResult, VkResultExt};

pub struct GfxDebugMsger {
    pub(crate) debug_utils_instance: ash::ext::debug_utils::Instance,
    pub(crate) debug_utils_messenger: vk::DebugUtilsMessengerEXT,
}

// new & init
impl GfxDebugMsger {
    pub fn new(vk_entry: &ash::Entry, instance: &ash::Instance) -> GfxResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(vk_entry, instance);

        let create_info = Self::debug_utils_messenger_ci();
        let debug_messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .vk_call("vkCreateDebugUtilsMessengerEXT")?;

        Ok(Self {
            debug_utils_instance: loader,
            debug_utils_messenger: debug_messenger,
        })
    }
}

// destroy
impl GfxDebugMsger {
    pub fn destroy(self) {
        log::info!("destroying debug messenger");
        unsafe {
            self.debug_utils_instance.destroy_debug_utils_messenger(self.debug_utils_messenger, None);
        }
    }
}

/// debug messenger 的回调函数
/// # Safety
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };

    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let format_msg = format!("[{:?}]\n{}\n", message_type, pretty_validation_message(msg.as_ref()));

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}", format_msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

/// 新版本的 validation layer 会输出 json，MainMessage 字段里面有换行符，需要单独输出
fn pretty_validation_message(msg: &str) -> String {
    let Ok(mut json_value) = serde_json::from_str::<serde_json::Value>(msg) else {
        return msg.to_string();
    };
    let Some(json_obj) = json_value.as_object_mut() else {
        return msg.to_string();
    };

    let main_msg = json_obj.remove("MainMessage");
    let main_msg_str = main_msg.as_ref().and_then(|value| value.as_str()).unwrap_or_default();
    let total_msg_str = serde_json::to_string_pretty(&json_obj).unwrap_or_else(|_| msg.to_string());

    format!("{}\n{}", total_msg_str, main_msg_str)
}

// 构造过程辅助函数
impl GfxDebugMsger {
    /// 用于创建 debug messenger 的结构体
    pub fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pretty_validation_message() {
        assert_eq!(pretty_validation_message("plain text"), "plain text");

        let msg = r#"{"MainMessage": "line1\nline2", "MessageID": 42}"#;
        let pretty = pretty_validation_message(msg);
        assert!(pretty.contains("\"MessageID\": 42"));
        assert!(pretty.ends_with("line1\nline2"));
        assert!(!pretty.contains("MainMessage"));
    }
}
