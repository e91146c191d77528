//! Neostore – a storage data model and query layer for electrophysiology
//! recordings organized the Neo way.
//!
//! A recording session is a [`model::Block`] holding [`model::Segment`]s,
//! each segment holding the data recorded during one epoch: regularly sampled
//! [`model::AnalogSignal`]s, [`model::IrregularlySampledSignal`]s,
//! [`model::SpikeTrain`]s (optionally with waveforms, see
//! [`model::SpikeTrainFull`]) and labeled [`model::Event`]s. Orthogonal to the
//! time hierarchy, [`model::RecordingChannel`]s are grouped into
//! [`model::RecordingChannelGroup`]s on which [`model::Unit`]s are detected.
//!
//! ## Modules
//! * [`units`] – quantity kinds and their closed sets of unit symbols.
//! * [`model`] – entity structs, kinds, families and the tagged unions over them.
//! * [`derive`] – sampling period, duration and stop time formulas.
//! * [`validate`] – batch validation run before every write.
//! * [`schema`] – a field catalogue per kind, for generic collaborators.
//! * [`query`] – filters, ordering and paging compiled to SQL.
//! * [`persist`] – SQLite schema and row mapping.
//! * [`repository`] – the [`repository::Database`], the only way in and out of the store.
//! * [`traverse`] – navigation between related entities.
//! * [`annotation`] – annotation stores.
//! * [`import`] – all-or-nothing import of a hierarchy.
//!
//! ## Quick Start
//! ```
//! use neostore::model::{AnalogSignal, Block, Segment};
//! use neostore::persist::PersistenceMode;
//! use neostore::repository::Database;
//!
//! let db = Database::new(PersistenceMode::InMemory).unwrap();
//! let block = db.create(Block::named("session 1")).unwrap();
//! let segment = db.create(Segment::named("trial 1", block.base.id)).unwrap();
//! let signal = AnalogSignal::new(segment.base.id.unwrap(), vec![0.0; 1000], 1000.0);
//! let signal = db.create(signal).unwrap();
//! assert_eq!(signal.t_stop().unwrap(), 1.0);
//! assert_eq!(segment.analog_signals(&db).count().unwrap(), 1);
//! ```

pub mod annotation;
pub mod derive;
pub mod error;
pub mod import;
pub mod model;
pub mod persist;
pub mod query;
pub mod repository;
pub mod schema;
pub mod settings;
pub mod traverse;
pub mod units;
pub mod validate;

pub use error::{NeoError, Result};
pub use repository::{Database, DeletePolicy, LabelResolver};
