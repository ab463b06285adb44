use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Fetched, SplitDone, Diffed, Indexed, Stored, Promoted, Recorded],
    events {
        fetch { transition: { from: Ready, to: Fetched } }
        split { transition: { from: Fetched, to: SplitDone } }
        diff { transition: { from: SplitDone, to: Diffed } }
        index { transition: { from: Diffed, to: Indexed } }
        store { transition: { from: Indexed, to: Stored } }
        promote { transition: { from: Stored, to: Promoted } }
        record { transition: { from: Promoted, to: Recorded } }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
