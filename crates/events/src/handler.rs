/// Execute an aggregate command deterministically (no IO, no persistence).
///
/// Decides events with `handle`, then applies each of them in order. Used by
/// unit tests and by callers that only need the resulting in-memory state;
/// the stored pipeline lives in `forgeerp-infra`'s `CommandDispatcher`.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: forgeerp_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
