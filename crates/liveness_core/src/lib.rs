pub mod challenge_evaluator;
pub mod clock;
pub mod domain;
pub mod error;
pub mod face_match;
pub mod finalizer;
pub mod image;
pub mod memory;
pub mod policy;
pub mod ports;
pub mod session_manager;

pub use challenge_evaluator::ChallengeEvaluator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    Challenge, ChallengeOutcome, ChallengeType, FaceMatchResult, FrameAnalysis, ReviewDecision,
    SessionStatus, StatusReport, SubmissionStatus, VerificationSession, VerificationStatus,
    VerificationSubmission,
};
pub use error::{VerificationError, VerificationResult};
pub use face_match::FaceMatchCoordinator;
pub use finalizer::VerificationFinalizer;
pub use image::{ImageFormat, ImageFrame};
pub use memory::{InMemorySessionRepository, InMemorySubmissionRepository};
pub use policy::VerificationPolicy;
pub use ports::{
    FaceComparisonService, FrameAnalysisService, PortError, PortResult, SessionRepository,
    SubmissionRepository,
};
pub use session_manager::SessionManager;
