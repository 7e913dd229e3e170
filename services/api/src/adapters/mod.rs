pub mod db;
pub mod face_llm;
pub mod frame_llm;
pub mod vision_llm;

pub use db::DbAdapter;
pub use face_llm::OpenAiFaceComparisonAdapter;
pub use frame_llm::OpenAiFrameAnalysisAdapter;
pub use vision_llm::VisionClient;
