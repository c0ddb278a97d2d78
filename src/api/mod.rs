//! Typed data-access facade over the resilience layer.

mod client;
mod types;

pub use client::{ApiClient, WriteAck};
pub use types::{
  AreaUnit, Article, AuthorRef, Comment, CommentInput, Crop, CropInput, CropStatus,
  CurrentWeather, DailyForecast, Post, PublishStatus, UserProfile,
};
