pub mod interner;
pub mod lookup;
pub mod model;
pub mod record;

pub use interner::{InternToken, InternedString, StringTable};
pub use lookup::HashLookupArray;
pub use model::{OutcomeCounts, ScanReport};
pub use record::{DescriptorArena, ProcessDescriptorRecord};
