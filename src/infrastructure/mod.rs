//! 基础设施层
//!
//! 持有稀缺资源（浏览器标签页），只暴露能力，不包含业务逻辑。

pub mod close_guard;
pub mod js_executor;

pub use close_guard::CloseGuard;
pub use js_executor::JsExecutor;
