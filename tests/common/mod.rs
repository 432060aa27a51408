mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from banknote_inspect for tests
pub use banknote_inspect::{
    BanknoteInspector, ConfigStore, ConfigUpdate, Configuration, Denomination,
    DenominationClassifier, DenominationLabel, Verdict,
};
