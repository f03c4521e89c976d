// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! Typed errors returned across component boundaries

use thiserror::Error;

/// Errors surfaced by the core pipeline components.
///
/// Every public operation returns one of these instead of panicking; the
/// consuming API layer maps them onto 4xx-style responses. None of the
/// `NotFound` paths mutate any state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node {node} does not subscribe to topic {topic}")]
    TopicNotSubscribed { node: String, topic: String },

    #[error("node {node} does not publish topic {topic}")]
    TopicNotPublished { node: String, topic: String },

    #[error("mission not found: {0}")]
    MissionNotFound(String),

    #[error("incident not found: {0}")]
    IncidentNotFound(String),

    #[error("valve not found: {0}")]
    ValveNotFound(String),

    #[error("leak not found: {0}")]
    LeakNotFound(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

/// Convenience alias used by the component APIs.
pub type Result<T> = std::result::Result<T, Error>;
