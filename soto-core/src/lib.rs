//! # soto-core
//!
//! The concurrency substrate for capturing a stereo PCM stream and making it
//! available to real-time consumers: a rate-monotonic periodic thread pool,
//! a cancellable task wrapper built on top of it, a slotted circular audio
//! sampler, a bounded MPSC queue, and a one-to-many broadcast dispatcher.
//!
//! Everything that touches an actual audio device, draws a plot, or runs an
//! FFT lives outside this crate; `soto-core` only defines the interfaces
//! those collaborators plug into (see [`sampler::AudioSource`]).

pub mod cancellable;
pub mod dispatch;
pub mod pool;
pub mod queue;
pub mod sampler;
pub mod time;
