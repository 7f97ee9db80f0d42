pub mod exam_code;
pub mod submission;
