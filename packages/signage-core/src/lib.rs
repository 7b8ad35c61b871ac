//! Signage Core - shared library for the device-resident signage agent.
//!
//! This crate provides the runtime that turns a paired display into a
//! playing signage device: pairing and mTLS credential bootstrap, content
//! caching, snapshot polling, timeline playback, remote commands, and the
//! default-media fallback. It is designed to be used by both the
//! standalone headless agent and an embedding host that supplies its own
//! renderer, proof-of-play, and telemetry bindings.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`events`]: Event system for renderer and diagnostics communication
//! - [`config`]: Persisted device configuration
//! - [`http_client`]: mTLS-capable backend HTTP client
//! - [`request_queue`]: Durable retry queue for failed backend deliveries
//! - [`cert`]: Device certificate generation, storage, and renewal
//! - [`pairing`]: Pairing-code based credential bootstrap
//! - [`cache`]: Bounded, integrity-checked content cache
//! - [`snapshot`]: Backend snapshot parsing and the polling manager
//! - [`scheduler`]: Timeline playback clock
//! - [`playback`]: Playback engine binding the scheduler to collaborators
//! - [`commands`]: Remote command polling and dispatch
//! - [`default_media`]: Default (fallback) media poller
//! - [`player_flow`]: Top-level device lifecycle state machine
//! - [`collaborators`]: Host-supplied renderer/proof-of-play/telemetry/screenshot traits
//! - [`bootstrap`]: Composition root wiring every service together
//! - [`single_instance`]: Exclusive lock preventing two agents sharing one data directory
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from
//! platform-specific implementations:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`Lifecycle`](lifecycle::Lifecycle): Process restart/shutdown
//! - [`RendererSink`](collaborators::RendererSink),
//!   [`ProofOfPlaySink`](collaborators::ProofOfPlaySink),
//!   [`TelemetrySink`](collaborators::TelemetrySink),
//!   [`ScreenshotCapture`](collaborators::ScreenshotCapture): host-supplied
//!   platform bindings, each with a `Noop`/`Logging` default suitable for
//!   the standalone agent.

#![warn(clippy::all)]

pub mod bootstrap;
pub mod cache;
pub mod cert;
pub mod collaborators;
pub mod commands;
pub mod config;
pub mod default_media;
pub mod error;
pub mod events;
pub mod http_client;
pub mod lifecycle;
pub mod pairing;
pub mod player_flow;
pub mod playback;
pub mod protocol_constants;
pub mod request_queue;
pub mod runtime;
pub mod scheduler;
pub mod single_instance;
pub mod snapshot;
pub mod utils;

pub use bootstrap::{bootstrap_services, BootstrappedServices, Collaborators, DataPaths};
pub use cache::CacheManager;
pub use cert::{CertMetadata, CertPaths, CertificateManager};
pub use commands::{CommandProcessor, CommandRecord};
pub use config::Config;
pub use default_media::{DefaultMediaService, DefaultMediaSetting};
pub use error::{SignageError, SignageResult};
pub use events::{BroadcastEvent, BroadcastEventBridge, EventEmitter};
pub use http_client::HttpClient;
pub use lifecycle::{Lifecycle, NoopLifecycle, ServerLifecycle};
pub use pairing::{DeviceDescriptor, PairingService, PairingState};
pub use player_flow::{PlayerFlow, PlayerState};
pub use playback::PlaybackEngine;
pub use request_queue::RequestQueue;
pub use runtime::{TaskSpawner, TokioSpawner};
pub use scheduler::TimelineScheduler;
pub use single_instance::InstanceLock;
pub use snapshot::{PlaybackPlaylist, PlaylistMode, SnapshotManager, TimelineItem};
