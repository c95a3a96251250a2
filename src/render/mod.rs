pub mod renderer;
pub mod recording;
pub mod log_renderer;

pub use renderer::RouteRenderer;
pub use recording::{RecordingRenderer, RenderCall};
pub use log_renderer::LogRenderer;
