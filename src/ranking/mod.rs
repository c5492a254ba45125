// src/ranking/mod.rs
pub mod assembler;
pub mod serendipity;

pub use assembler::{assemble, RankedArticle};
pub use serendipity::{select, top_count, SerendipitySplit};
