use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Sourced, Validated, Unpacked, FramesIndexed, Cached, Segmented, Failed],
    events {
        source { transition: { from: Ready, to: Sourced } }
        validate { transition: { from: Sourced, to: Validated } }
        unpack { transition: { from: Validated, to: Unpacked } }
        index_frames { transition: { from: Unpacked, to: FramesIndexed } }
        cache { transition: { from: FramesIndexed, to: Cached } }
        segment { transition: { from: Cached, to: Segmented } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Sourced, to: Failed }
            transition: { from: Validated, to: Failed }
            transition: { from: Unpacked, to: Failed }
            transition: { from: FramesIndexed, to: Failed }
            transition: { from: Cached, to: Failed }
            transition: { from: Segmented, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
