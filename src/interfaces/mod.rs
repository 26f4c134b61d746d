pub mod slack;
pub mod web;
