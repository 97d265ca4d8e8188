//! Repository layer: unit structs with static async query methods.

mod delivery_repo;
mod notification_repo;
mod preference_repo;
mod user_repo;

pub use delivery_repo::DeliveryRepo;
pub use notification_repo::NotificationRepo;
pub use preference_repo::PreferenceRepo;
pub use user_repo::UserRepo;
