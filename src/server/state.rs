use crate::pipeline::ReadingPipeline;

pub struct AppState {
    pub pipeline: ReadingPipeline,
}
