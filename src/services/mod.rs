pub mod actor;
pub mod code_generator;
pub mod enrollment;
pub mod exam_status;
pub mod notifications;
pub mod question_bank;
pub mod scoring;
pub mod shuffle;
pub mod submissions;
pub mod violations;
pub mod work_timing;
