use crate::core::{PlayerError, Result};
use ffmpeg_next::ffi::{
    av_hwdevice_find_type_by_name, av_hwdevice_get_type_name, av_hwdevice_iterate_types,
    AVHWDeviceType,
};
use log::debug;
use std::ffi::{CStr, CString};
use std::fmt;

/// 硬件解码设备类型（FFmpeg 编译时启用的设备）
///
/// 目前只用于配置和日志，解码始终走软件路径。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HwDeviceType(AVHWDeviceType);

impl HwDeviceType {
    /// CPU 软解
    pub const NONE: HwDeviceType = HwDeviceType(AVHWDeviceType::AV_HWDEVICE_TYPE_NONE);

    /// 列出链接的 FFmpeg 支持的全部设备类型（首项为 CPU 软解）
    pub fn available() -> Vec<HwDeviceType> {
        let mut types = vec![Self::NONE];
        let mut current = AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;
        loop {
            // SAFETY: 纯查询函数，参数为上一次返回的枚举值
            current = unsafe { av_hwdevice_iterate_types(current) };
            if current == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
                break;
            }
            types.push(HwDeviceType(current));
        }
        debug!("FFmpeg 支持 {} 种硬件设备类型", types.len() - 1);
        types
    }

    /// 按名称查找，"default_cpu"/"none"/空串 表示 CPU 软解
    pub fn from_name(name: &str) -> Result<HwDeviceType> {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("none") || name == "default_cpu" {
            return Ok(Self::NONE);
        }

        let c_name = CString::new(name)
            .map_err(|_| PlayerError::ConfigError(format!("无效的硬件设备名: {:?}", name)))?;
        // SAFETY: c_name 在调用期间有效，函数不保留指针
        let found = unsafe { av_hwdevice_find_type_by_name(c_name.as_ptr()) };
        if found == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            return Err(PlayerError::ConfigError(format!("未知的硬件设备类型: {}", name)));
        }
        Ok(HwDeviceType(found))
    }

    pub fn name(&self) -> String {
        if self.is_none() {
            return "default_cpu".to_string();
        }
        // SAFETY: 返回静态字符串或 NULL
        let ptr = unsafe { av_hwdevice_get_type_name(self.0) };
        if ptr.is_null() {
            return format!("{:?}", self.0);
        }
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    pub fn is_none(&self) -> bool {
        self.0 == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE
    }
}

impl Default for HwDeviceType {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for HwDeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_default_cpu() {
        assert_eq!(HwDeviceType::default(), HwDeviceType::NONE);
        assert_eq!(HwDeviceType::NONE.name(), "default_cpu");
        assert_eq!(HwDeviceType::from_name("default_cpu").unwrap(), HwDeviceType::NONE);
        assert_eq!(HwDeviceType::from_name("").unwrap(), HwDeviceType::NONE);
    }

    #[test]
    fn test_available_round_trips_names() {
        let types = HwDeviceType::available();
        assert_eq!(types[0], HwDeviceType::NONE);
        for ty in types.iter().skip(1) {
            assert!(!ty.is_none());
            assert_eq!(HwDeviceType::from_name(&ty.name()).unwrap(), *ty);
        }
    }

    #[test]
    fn test_unknown_name_is_config_error() {
        assert!(matches!(
            HwDeviceType::from_name("no-such-accelerator"),
            Err(PlayerError::ConfigError(_))
        ));
    }
}
