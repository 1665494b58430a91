use std::io;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpListener, TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use super::{
    Collective, Wire,
    codec::{self, FrameReceiver, FrameSender},
};
use crate::error::{RefineErr, Result};

/// The first frame a peer sends to the coordinator.
#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    rank: usize,
    size: usize,
    coordinator: usize,
}

struct Link<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    rx: FrameReceiver<R>,
    tx: FrameSender<W>,
}

enum Links<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    Coordinator(Vec<Option<Link<R, W>>>),
    Peer(Link<R, W>),
}

/// A participant connected to its group through byte streams.
///
/// The coordinator holds one stream per peer, peers hold a single stream to
/// the coordinator. Frames on a stream are read in the order they were sent.
pub struct StreamCollective<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    rank: usize,
    size: usize,
    coordinator: usize,
    links: Links<R, W>,
}

/// A participant connected to its group over TCP.
pub type TcpCollective = StreamCollective<OwnedReadHalf, OwnedWriteHalf>;

/// Maps a closed stream to a disconnect of the worker on the other end.
fn lost(rank: usize) -> impl FnOnce(RefineErr) -> RefineErr {
    move |err| match err {
        RefineErr::Io(e)
            if matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ) =>
        {
            RefineErr::Disconnected { rank }
        }
        other => other,
    }
}

impl<R, W> StreamCollective<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Joins a group as a peer over an already open stream to the coordinator.
    ///
    /// # Arguments
    /// * `rank` - This participant's id.
    /// * `size` - The amount of participants.
    /// * `coordinator` - The coordinator's id.
    /// * `rx` - Reading half of the stream to the coordinator.
    /// * `tx` - Writing half of the stream to the coordinator.
    pub async fn join(rank: usize, size: usize, coordinator: usize, rx: R, tx: W) -> Result<Self> {
        if rank >= size || coordinator >= size || rank == coordinator {
            return Err(RefineErr::InvalidConfig(format!(
                "rank {rank} can't join a group of {size} coordinated by {coordinator}"
            )));
        }

        let (rx, mut tx) = codec::channel(rx, tx);
        let hello = Hello {
            rank,
            size,
            coordinator,
        };
        tx.send(&hello).await.map_err(lost(coordinator))?;

        debug!(rank = rank, coordinator = coordinator; "joined group");
        Ok(Self {
            rank,
            size,
            coordinator,
            links: Links::Peer(Link { rx, tx }),
        })
    }

    /// Hosts a group as its coordinator over one open stream per peer.
    ///
    /// Peers may be given in any order, each one is placed by the rank it announces.
    ///
    /// # Arguments
    /// * `rank` - This participant's id, which becomes the coordinator.
    /// * `size` - The amount of participants.
    /// * `streams` - Reading and writing halves of every peer's stream.
    pub async fn host(rank: usize, size: usize, streams: Vec<(R, W)>) -> Result<Self> {
        if rank >= size || streams.len() + 1 != size {
            return Err(RefineErr::InvalidConfig(format!(
                "coordinator {rank} can't host a group of {size} with {} peers",
                streams.len()
            )));
        }

        let mut links: Vec<Option<Link<R, W>>> = (0..size).map(|_| None).collect();

        for (rx, tx) in streams {
            let (mut rx, tx) = codec::channel(rx, tx);
            let hello: Hello = rx.recv().await?;

            if hello.size != size || hello.coordinator != rank {
                return Err(RefineErr::Protocol(format!(
                    "peer {} expects a group of {} coordinated by {}",
                    hello.rank, hello.size, hello.coordinator
                )));
            }

            if hello.rank == rank || hello.rank >= size || links[hello.rank].is_some() {
                return Err(RefineErr::Protocol(format!(
                    "peer announced an invalid or duplicate rank {}",
                    hello.rank
                )));
            }

            debug!(rank = hello.rank; "peer joined");
            links[hello.rank] = Some(Link { rx, tx });
        }

        Ok(Self {
            rank,
            size,
            coordinator: rank,
            links: Links::Coordinator(links),
        })
    }
}

impl TcpCollective {
    /// Accepts every peer of the group on `listener` and becomes its coordinator.
    pub async fn listen(listener: &TcpListener, rank: usize, size: usize) -> Result<Self> {
        let mut streams = Vec::with_capacity(size.saturating_sub(1));

        while streams.len() + 1 < size {
            let (stream, addr) = listener.accept().await?;
            stream.set_nodelay(true)?;
            debug!(addr:% = addr; "accepted peer connection");
            streams.push(stream.into_split());
        }

        let comm = Self::host(rank, size, streams).await?;
        info!(size = size; "group assembled");
        Ok(comm)
    }

    /// Connects to the coordinator at `addr` and joins its group.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        rank: usize,
        size: usize,
        coordinator: usize,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        Self::join(rank, size, coordinator, rx, tx).await
    }
}

impl<R, W> Collective for StreamCollective<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
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

        match &mut self.links {
            Links::Peer(link) => {
                link.tx.send(&part).await.map_err(lost(coordinator))?;
                Ok(None)
            }
            Links::Coordinator(links) => {
                let mut own = Some(part);
                let mut parts = Vec::with_capacity(links.len());

                for (from, link) in links.iter_mut().enumerate() {
                    let part = match link {
                        None => own.take().ok_or_else(|| {
                            RefineErr::Protocol("coordinator contributed twice".into())
                        })?,
                        Some(link) => link.rx.recv().await.map_err(lost(from))?,
                    };

                    parts.push(part);
                }

                Ok(Some(parts))
            }
        }
    }

    async fn broadcast<T: Wire>(&mut self, value: Option<Vec<T>>) -> Result<Vec<T>> {
        let coordinator = self.coordinator;

        match &mut self.links {
            Links::Peer(link) => link.rx.recv().await.map_err(lost(coordinator)),
            Links::Coordinator(links) => {
                let value = value.ok_or_else(|| {
                    RefineErr::Protocol("the coordinator has nothing to broadcast".into())
                })?;

                for (to, link) in links.iter_mut().enumerate() {
                    if let Some(link) = link {
                        link.tx.send(&value).await.map_err(lost(to))?;
                    }
                }

                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};

    use super::*;

    type Duplex = StreamCollective<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    /// Wires a group of `size` over in-memory duplex streams, coordinator 0.
    async fn duplex_group(size: usize) -> Vec<Duplex> {
        let mut host_side = Vec::new();
        let mut joins = Vec::new();

        for rank in 1..size {
            let (a, b) = io::duplex(1 << 16);
            host_side.push(io::split(a));

            let (rx, tx) = io::split(b);
            joins.push(tokio::spawn(Duplex::join(rank, size, 0, rx, tx)));
        }

        // Announce peers in reverse order, the host must still place them by rank.
        host_side.reverse();
        let mut group = vec![Duplex::host(0, size, host_side).await.unwrap()];
        for join in joins {
            group.push(join.await.unwrap().unwrap());
        }

        group
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn gather_then_broadcast_over_streams() {
        let group = duplex_group(3).await;

        let tasks: Vec<_> = group
            .into_iter()
            .map(|mut comm| {
                tokio::spawn(async move {
                    let rank = comm.rank() as u32;
                    comm.barrier().await?;
                    let gathered = comm.gather(vec![rank * 10]).await?;
                    let flat = gathered.map(|parts| parts.concat());
                    comm.broadcast(flat).await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), vec![0, 10, 20]);
        }
    }

    async fn relay<C, T>(mut comm: C, part: Vec<T>) -> Result<Vec<T>>
    where
        C: Collective + Send,
        T: Wire,
    {
        let gathered = comm.gather(part).await?;
        comm.broadcast(gathered.map(|parts| parts.concat())).await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn any_wire_type_can_be_relayed_from_a_spawned_task() {
        let group = duplex_group(3).await;

        let tasks: Vec<_> = group
            .into_iter()
            .map(|comm| {
                let part = vec![format!("w{}", comm.rank())];
                tokio::spawn(relay(comm, part))
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), vec!["w0", "w1", "w2"]);
        }
    }

    #[tokio::test]
    async fn mismatched_group_size_is_rejected() {
        let (a, b) = io::duplex(1024);
        let (rx, tx) = io::split(b);
        let join = tokio::spawn(Duplex::join(1, 3, 0, rx, tx));

        let res = Duplex::host(0, 2, vec![io::split(a)]).await;
        assert!(matches!(res, Err(RefineErr::Protocol(_))));
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closed_peer_is_a_disconnect() {
        let mut group = duplex_group(2).await;
        drop(group.pop());
        let mut host = group.pop().unwrap();

        let res = host.gather(vec![1u32]).await;
        assert!(matches!(res, Err(RefineErr::Disconnected { rank: 1 })));
    }
}
