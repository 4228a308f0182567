// src/services/mod.rs

pub mod attempts;
pub mod authoring;
pub mod quizzes;
pub mod scoring;
