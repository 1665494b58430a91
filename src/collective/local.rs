use std::any::Any;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{Collective, Wire};
use crate::error::{RefineErr, Result};

type Parcel = Box<dyn Any + Send>;

enum Role {
    Coordinator {
        inbox: Vec<Option<UnboundedReceiver<Parcel>>>,
        outbox: Vec<Option<UnboundedSender<Parcel>>>,
    },
    Peer {
        tx: UnboundedSender<Parcel>,
        rx: UnboundedReceiver<Parcel>,
    },
}

/// An in-process participant of a `LocalGroup`.
///
/// Parts travel as owned values over per-peer channels, so consecutive
/// collectives can never interleave at the coordinator. A dropped participant
/// closes its channels, which its peers observe as a disconnect.
pub struct LocalCollective {
    rank: usize,
    size: usize,
    coordinator: usize,
    role: Role,
}

/// Builder for a set of in-process participants sharing one group.
pub struct LocalGroup;

impl LocalGroup {
    /// Creates every participant of a group.
    ///
    /// # Arguments
    /// * `size` - The amount of participants.
    /// * `coordinator` - The id of the gathering and broadcasting participant.
    ///
    /// # Returns
    /// The participants ordered by rank, or `InvalidConfig` for an empty group or a bad coordinator.
    pub fn new(size: usize, coordinator: usize) -> Result<Vec<LocalCollective>> {
        if coordinator >= size {
            return Err(RefineErr::InvalidConfig(format!(
                "coordinator {coordinator} out of range for a group of {size}"
            )));
        }

        let mut inbox = Vec::with_capacity(size);
        let mut outbox = Vec::with_capacity(size);
        let mut roles = Vec::with_capacity(size);

        for rank in 0..size {
            if rank == coordinator {
                inbox.push(None);
                outbox.push(None);
                continue;
            }

            let (up_tx, up_rx) = mpsc::unbounded_channel();
            let (down_tx, down_rx) = mpsc::unbounded_channel();
            inbox.push(Some(up_rx));
            outbox.push(Some(down_tx));
            roles.push(Role::Peer {
                tx: up_tx,
                rx: down_rx,
            });
        }

        roles.insert(coordinator, Role::Coordinator { inbox, outbox });

        let group = roles
            .into_iter()
            .enumerate()
            .map(|(rank, role)| LocalCollective {
                rank,
                size,
                coordinator,
                role,
            })
            .collect();

        Ok(group)
    }
}

fn unpack<T: Wire>(parcel: Parcel, from: usize) -> Result<Vec<T>> {
    parcel
        .downcast::<Vec<T>>()
        .map(|part| *part)
        .map_err(|_| RefineErr::Protocol(format!("unexpected payload type from worker {from}")))
}

impl Collective for LocalCollective {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn coordinator(&self) -> usize {
        self.coordinator
    }

    async fn barrier(&mut self) -> Result<()> {
        let arrived = self.gather::<()>(Vec::new()).await?;
        self.broadcast::<()>(arrived.map(|_| Vec::new())).await?;
        Ok(())
    }

    async fn gather<T: Wire>(&mut self, part: Vec<T>) -> Result<Option<Vec<Vec<T>>>> {
        let coordinator = self.coordinator;
        let rank = self.rank;

        match &mut self.role {
            Role::Peer { tx, .. } => {
                tx.send(Box::new(part))
                    .map_err(|_| RefineErr::Disconnected { rank: coordinator })?;
                Ok(None)
            }
            Role::Coordinator { inbox, .. } => {
                let mut own = Some(part);
                let mut parts = Vec::with_capacity(inbox.len());

                for (from, rx) in inbox.iter_mut().enumerate() {
                    let part = match rx {
                        None => own.take().ok_or_else(|| {
                            RefineErr::Protocol(format!("worker {rank} contributed twice"))
                        })?,
                        Some(rx) => {
                            let parcel = rx
                                .recv()
                                .await
                                .ok_or(RefineErr::Disconnected { rank: from })?;
                            unpack(parcel, from)?
                        }
                    };

                    parts.push(part);
                }

                Ok(Some(parts))
            }
        }
    }

    async fn broadcast<T: Wire>(&mut self, value: Option<Vec<T>>) -> Result<Vec<T>> {
        let coordinator = self.coordinator;

        match &mut self.role {
            Role::Peer { rx, .. } => {
                let parcel = rx
                    .recv()
                    .await
                    .ok_or(RefineErr::Disconnected { rank: coordinator })?;
                unpack(parcel, coordinator)
            }
            Role::Coordinator { outbox, .. } => {
                let value = value.ok_or_else(|| {
                    RefineErr::Protocol("the coordinator has nothing to broadcast".into())
                })?;

                for (to, tx) in outbox.iter().enumerate() {
                    if let Some(tx) = tx {
                        tx.send(Box::new(value.clone()))
                            .map_err(|_| RefineErr::Disconnected { rank: to })?;
                    }
                }

                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn gather_orders_parts_by_rank() {
        let group = LocalGroup::new(3, 1).unwrap();

        let tasks: Vec<_> = group
            .into_iter()
            .map(|mut comm| {
                tokio::spawn(async move {
                    let part = vec![comm.rank() as u32; comm.rank() + 1];
                    comm.gather(part).await
                })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }

        assert!(results[0].is_none());
        assert!(results[2].is_none());
        assert_eq!(
            results[1].as_ref().unwrap(),
            &vec![vec![0], vec![1, 1], vec![2, 2, 2]]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn broadcast_reaches_everyone() {
        let group = LocalGroup::new(4, 0).unwrap();

        let tasks: Vec<_> = group
            .into_iter()
            .map(|mut comm| {
                tokio::spawn(async move {
                    let value = (comm.rank() == 0).then(|| vec![true, false, true]);
                    comm.broadcast(value).await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), vec![true, false, true]);
        }
    }

    #[tokio::test]
    async fn dropped_peer_is_a_disconnect() {
        let mut group = LocalGroup::new(2, 0).unwrap();
        drop(group.pop());
        let mut coordinator = group.pop().unwrap();

        let res = coordinator.gather(vec![1u32]).await;
        assert!(matches!(res, Err(RefineErr::Disconnected { rank: 1 })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn barrier_reports_a_vanished_peer() {
        let mut group = LocalGroup::new(3, 0).unwrap();
        drop(group.pop());

        let tasks: Vec<_> = group
            .into_iter()
            .map(|mut comm| tokio::spawn(async move { comm.barrier().await }))
            .collect();

        for task in tasks {
            assert!(matches!(
                task.await.unwrap(),
                Err(RefineErr::Disconnected { .. })
            ));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn barrier_releases_everyone() {
        let group = LocalGroup::new(4, 2).unwrap();

        let tasks: Vec<_> = group
            .into_iter()
            .map(|mut comm| tokio::spawn(async move { comm.barrier().await }))
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
    }

    #[test]
    fn coordinator_must_be_a_member() {
        assert!(LocalGroup::new(2, 2).is_err());
        assert!(LocalGroup::new(0, 0).is_err());
    }
}
