pub mod category_ctx;
pub mod category_flow;

pub use category_ctx::CategoryCtx;
pub use category_flow::CategoryFlow;
