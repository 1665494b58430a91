mod codec;
mod local;
mod stream;

use serde::{Serialize, de::DeserializeOwned};

pub use codec::{FrameReceiver, FrameSender, channel};
pub use local::{LocalCollective, LocalGroup};
pub use stream::{StreamCollective, TcpCollective};

use crate::error::Result;

/// Values that can travel through a collective operation.
///
/// Parts are borrowed across awaits while they are written out, hence `Sync`.
pub trait Wire: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Wire for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// The blocking collective operations a group of workers relies on.
///
/// Every worker of the group must call the same operations in the same order.
/// There are no timeouts, a worker that never arrives stalls its peers.
#[allow(unused)]
#[trait_variant::make(Collective: Send)]
pub trait CollectiveTemplate {
    /// This participant's id within the group.
    fn rank(&self) -> usize;

    /// The amount of participants in the group.
    fn size(&self) -> usize;

    /// The participant that gathers and broadcasts.
    fn coordinator(&self) -> usize;

    /// Should wait until every participant has reached the barrier.
    async fn barrier(&mut self) -> Result<()>;

    /// Should collect one variable length part from every participant at the coordinator.
    ///
    /// # Arguments
    /// * `part` - This participant's contribution.
    ///
    /// # Returns
    /// On the coordinator, every part ordered by participant id. `None` everywhere else.
    async fn gather<T: Wire>(&mut self, part: Vec<T>) -> Result<Option<Vec<Vec<T>>>>;

    /// Should distribute the coordinator's value to every participant.
    ///
    /// # Arguments
    /// * `value` - The value to distribute, only read on the coordinator.
    ///
    /// # Returns
    /// An identical copy of the coordinator's value on every participant.
    async fn broadcast<T: Wire>(&mut self, value: Option<Vec<T>>) -> Result<Vec<T>>;
}
