//! 图形后端模块
//!
//! - `backend`：后端必须实现的统一接口
//! - `sim`：内存中的模拟 GPU，用于无窗口运行和测试
//! - `dx12`：DirectX 12 实现（仅 Windows）

pub mod backend;
pub mod sim;
#[cfg(target_os = "windows")]
pub mod dx12;

pub use backend::Backend;
