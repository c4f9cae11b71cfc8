/// Execute an aggregate command deterministically (no IO, no async).
///
/// Combines the canonical event-sourced lifecycle in one step:
///
/// 1. **Decide**: `aggregate.handle(command)` produces events (pure).
/// 2. **Evolve**: each event is applied to the aggregate in order.
///
/// This mutates the aggregate in place and is intended for tests and inline
/// processing. For the full pipeline (persistence, optimistic concurrency,
/// publication) use the command dispatcher in the infra crate.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: plotfund_core::Aggregate,
{
    let events = aggregate.handle(command)?;
    for event in &events {
        aggregate.apply(event);
    }
    Ok(events)
}
