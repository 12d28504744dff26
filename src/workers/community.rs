/// The community of preset executors that supervised workers can run.
///
/// `lookup` answers vote counts after a simulated network delay drawn from
/// a `delay` generator; `sink_writer` stores votes into a `Sink`.
pub mod delay;
pub mod lookup;
pub mod sink_writer;
