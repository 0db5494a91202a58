/// Vulkan Debug Messenger - Routes validation layer messages into the engine log
///
/// Validation errors are also queued so the next `check_errors` call on the
/// device reports them as a backend error.

use ash::vk;
use colored::*;
use umbra_backend::umbra::device::DebugSeverity;
use umbra_backend::{engine_error, engine_info, engine_warn, engine_trace};
use std::ffi::CStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Global debug configuration (shared across callbacks)
static DEBUG_SEVERITY: Mutex<Option<DebugSeverity>> = Mutex::new(None);

/// Validation errors not yet reported by `check_errors`
static PENDING_ERRORS: Mutex<Vec<String>> = Mutex::new(Vec::new());

static ERROR_COUNT: AtomicU32 = AtomicU32::new(0);
static WARNING_COUNT: AtomicU32 = AtomicU32::new(0);

/// Validation message counters since the messenger was installed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    pub errors: u32,
    pub warnings: u32,
}

/// Initialize debug configuration and reset the counters
pub fn init_debug_config(severity: DebugSeverity) {
    ERROR_COUNT.store(0, Ordering::Relaxed);
    WARNING_COUNT.store(0, Ordering::Relaxed);
    if let Ok(mut pending) = PENDING_ERRORS.lock() {
        pending.clear();
    }
    if let Ok(mut config) = DEBUG_SEVERITY.lock() {
        *config = Some(severity);
    }
}

/// Stop handling callbacks (device teardown)
pub fn cleanup_debug_config() {
    if let Ok(mut config) = DEBUG_SEVERITY.lock() {
        *config = None;
    }
}

/// Validation errors received since the last call
pub fn take_pending_errors() -> Vec<String> {
    PENDING_ERRORS.lock().map(|mut pending| std::mem::take(&mut *pending)).unwrap_or_default()
}

pub fn get_validation_stats() -> ValidationStats {
    ValidationStats {
        errors: ERROR_COUNT.load(Ordering::Relaxed),
        warnings: WARNING_COUNT.load(Ordering::Relaxed),
    }
}

/// Print validation statistics report
pub fn print_validation_stats_report() {
    let stats = get_validation_stats();

    if stats.errors == 0 && stats.warnings == 0 {
        println!("\n{}", "✓ No validation messages".green().bold());
        return;
    }

    println!("\n{}", "=== Validation Statistics Report ===".bright_blue().bold());
    if stats.errors > 0 {
        println!("  {} {}", "Errors:".red().bold(), stats.errors);
    }
    if stats.warnings > 0 {
        println!("  {} {}", "Warnings:".yellow().bold(), stats.warnings);
    }
    println!("{}\n", "====================================".bright_blue().bold());
}

/// Severity flags the messenger subscribes to
pub fn severity_flags(severity: DebugSeverity) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    match severity {
        DebugSeverity::ErrorsOnly => vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        DebugSeverity::ErrorsAndWarnings => {
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        }
        DebugSeverity::All => {
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        }
    }
}

/// Vulkan debug messenger callback
///
/// Called by the validation layers when they detect issues.
pub unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let configured = DEBUG_SEVERITY.lock().map(|config| config.is_some()).unwrap_or(false);
    if !configured || p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = *p_callback_data;
    let message_id_name = if callback_data.p_message_id_name.is_null() {
        "Unknown"
    } else {
        CStr::from_ptr(callback_data.p_message_id_name)
            .to_str()
            .unwrap_or("Invalid UTF-8")
    };
    let message = if callback_data.p_message.is_null() {
        "No message"
    } else {
        CStr::from_ptr(callback_data.p_message)
            .to_str()
            .unwrap_or("Invalid UTF-8")
    };

    let type_str = if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else {
        "General"
    };

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        ERROR_COUNT.fetch_add(1, Ordering::Relaxed);
        engine_error!("umbra::vulkan::validation", "[{}] {}: {}", type_str, message_id_name, message);
        if let Ok(mut pending) = PENDING_ERRORS.lock() {
            pending.push(format!("{}: {}", message_id_name, message));
        }
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        WARNING_COUNT.fetch_add(1, Ordering::Relaxed);
        engine_warn!("umbra::vulkan::validation", "[{}] {}: {}", type_str, message_id_name, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        engine_info!("umbra::vulkan::validation", "[{}] {}: {}", type_str, message_id_name, message);
    } else {
        engine_trace!("umbra::vulkan::validation", "[{}] {}: {}", type_str, message_id_name, message);
    }

    vk::FALSE // Don't abort Vulkan execution
}
