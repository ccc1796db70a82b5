mod status;
mod submission;

pub use status::{
    Job, JobHistory, JobShapeError, StatusEnvelope, StatusOutput, SubmitEnvelope,
    TaskStatus, TransitionError,
};
pub use submission::{JobSubmission, VideoRequest, DEFAULT_VIDEO_DURATION_S, DEFAULT_VIDEO_RESOLUTION};
