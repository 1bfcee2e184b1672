mod profile_store;

pub use profile_store::{
    FlashProfileStore, PROFILE_STORE_MAGIC, PROFILE_STORE_RECORD_LEN, PROFILE_STORE_VERSION,
};
