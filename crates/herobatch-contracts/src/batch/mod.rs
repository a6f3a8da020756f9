mod job;
mod request;
mod result;

pub use job::{BatchJob, BatchState, FileState, RemoteFile};
pub use request::{
    read_batch_artifact, write_batch_artifact, BatchRequestLine, Content, FileData,
    GenerateContentRequest, GenerationConfig, GenerationRequest, RequestPart,
    IMAGE_RESPONSE_MODALITY,
};
pub use result::{decode_result_line, DecodedResult, UNKNOWN_RESULT_KEY};
