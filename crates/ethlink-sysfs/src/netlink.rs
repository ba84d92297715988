//! rtnetlink requests for the driven interface
//!
//! The driver surface is synchronous and is called from inside the link
//! state tracker's task, where blocking on a runtime is not allowed. The
//! netlink connection therefore lives on its own thread with a
//! current-thread runtime; callers post a [`Request`] and block on the
//! reply channel.

use ethlink_core::{Error, Result};
use std::net::Ipv4Addr;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::mpsc;
use tracing::error;

type Reply<T> = std_mpsc::SyncSender<Result<T>>;

/// One request served by the netlink thread
enum Request {
    SetLink {
        index: u32,
        up: bool,
        reply: Reply<()>,
    },
    FlushAddresses {
        index: u32,
        reply: Reply<()>,
    },
    AddAddress {
        index: u32,
        address: Ipv4Addr,
        prefix_len: u8,
        reply: Reply<()>,
    },
    ReplaceDefaultRoute {
        index: u32,
        gateway: Ipv4Addr,
        reply: Reply<()>,
    },
    FlushNeighbours {
        index: u32,
        reply: Reply<()>,
    },
    Address {
        index: u32,
        reply: Reply<Option<(Ipv4Addr, u8)>>,
    },
    DefaultGateway {
        index: u32,
        reply: Reply<Option<Ipv4Addr>>,
    },
}

/// Client of the netlink thread
pub struct Netlink {
    requests: mpsc::UnboundedSender<Request>,
}

impl Netlink {
    /// Start the netlink thread
    ///
    /// The socket is opened on the thread; if that fails every request
    /// reports a driver error.
    pub fn spawn() -> Result<Self> {
        let (requests, inbox) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name("ethlink-netlink".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(serve(inbox)),
                    Err(e) => error!("Failed to create netlink runtime: {}", e),
                }
            })?;

        Ok(Self { requests })
    }

    fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, response) = std_mpsc::sync_channel(1);
        self.requests
            .send(request(reply))
            .map_err(|_| Error::driver("netlink thread is not running"))?;
        response
            .recv()
            .map_err(|_| Error::driver("netlink thread dropped the request"))?
    }

    /// Set the administrative state of a link
    pub fn set_link(&self, index: u32, up: bool) -> Result<()> {
        self.call(|reply| Request::SetLink { index, up, reply })
    }

    /// Remove every IPv4 address from a link
    pub fn flush_addresses(&self, index: u32) -> Result<()> {
        self.call(|reply| Request::FlushAddresses { index, reply })
    }

    pub fn add_address(&self, index: u32, address: Ipv4Addr, prefix_len: u8) -> Result<()> {
        self.call(|reply| Request::AddAddress {
            index,
            address,
            prefix_len,
            reply,
        })
    }

    /// Make `gateway` the only default route through a link
    pub fn replace_default_route(&self, index: u32, gateway: Ipv4Addr) -> Result<()> {
        self.call(|reply| Request::ReplaceDefaultRoute {
            index,
            gateway,
            reply,
        })
    }

    /// Drop the neighbour cache entries of a link
    pub fn flush_neighbours(&self, index: u32) -> Result<()> {
        self.call(|reply| Request::FlushNeighbours { index, reply })
    }

    /// First IPv4 address and prefix length on a link
    pub fn ipv4_address(&self, index: u32) -> Result<Option<(Ipv4Addr, u8)>> {
        self.call(|reply| Request::Address { index, reply })
    }

    /// Gateway of the default route through a link
    pub fn default_gateway(&self, index: u32) -> Result<Option<Ipv4Addr>> {
        self.call(|reply| Request::DefaultGateway { index, reply })
    }
}

#[cfg(target_os = "linux")]
async fn serve(mut inbox: mpsc::UnboundedReceiver<Request>) {
    let handle = match rtnetlink::new_connection() {
        Ok((connection, handle, _)) => {
            tokio::spawn(connection);
            handle
        }
        Err(e) => {
            error!("Unable to open netlink socket: {}", e);
            return;
        }
    };

    while let Some(request) = inbox.recv().await {
        // A caller that gave up waiting is not an error
        match request {
            Request::SetLink { index, up, reply } => {
                let _ = reply.send(rtnl::set_link(&handle, index, up).await);
            }
            Request::FlushAddresses { index, reply } => {
                let _ = reply.send(rtnl::flush_addresses(&handle, index).await);
            }
            Request::AddAddress {
                index,
                address,
                prefix_len,
                reply,
            } => {
                let _ = reply.send(rtnl::add_address(&handle, index, address, prefix_len).await);
            }
            Request::ReplaceDefaultRoute {
                index,
                gateway,
                reply,
            } => {
                let _ = reply.send(rtnl::replace_default_route(&handle, index, gateway).await);
            }
            Request::FlushNeighbours { index, reply } => {
                let _ = reply.send(rtnl::flush_neighbours(&handle, index).await);
            }
            Request::Address { index, reply } => {
                let _ = reply.send(rtnl::ipv4_address(&handle, index).await);
            }
            Request::DefaultGateway { index, reply } => {
                let _ = reply.send(rtnl::default_gateway(&handle, index).await);
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
async fn serve(inbox: mpsc::UnboundedReceiver<Request>) {
    error!("netlink is only available on Linux");
    drop(inbox);
}

#[cfg(target_os = "linux")]
mod rtnl {
    use ethlink_core::{Error, Result};
    use futures::TryStreamExt;
    use netlink_packet_route::AddressFamily;
    use netlink_packet_route::address::{AddressAttribute, AddressMessage};
    use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteMessage};
    use rtnetlink::{Handle, LinkUnspec, RouteMessageBuilder};
    use std::net::{IpAddr, Ipv4Addr};
    use std::pin::pin;
    use tracing::debug;

    fn failed(what: &str, e: rtnetlink::Error) -> Error {
        Error::driver(format!("{}: {}", what, e))
    }

    pub async fn set_link(handle: &Handle, index: u32, up: bool) -> Result<()> {
        let link = LinkUnspec::new_with_index(index);
        let message = if up {
            link.up().build()
        } else {
            link.down().build()
        };
        handle
            .link()
            .set(message)
            .execute()
            .await
            .map_err(|e| failed("set link", e))
    }

    async fn ipv4_addresses(handle: &Handle, index: u32) -> Result<Vec<AddressMessage>> {
        let mut messages = pin!(
            handle
                .address()
                .get()
                .set_link_index_filter(index)
                .execute()
        );

        let mut found = Vec::new();
        while let Some(message) = messages
            .try_next()
            .await
            .map_err(|e| failed("dump addresses", e))?
        {
            if message.header.family == AddressFamily::Inet {
                found.push(message);
            }
        }
        Ok(found)
    }

    pub async fn flush_addresses(handle: &Handle, index: u32) -> Result<()> {
        for message in ipv4_addresses(handle, index).await? {
            handle
                .address()
                .del(message)
                .execute()
                .await
                .map_err(|e| failed("delete address", e))?;
        }
        Ok(())
    }

    pub async fn add_address(
        handle: &Handle,
        index: u32,
        address: Ipv4Addr,
        prefix_len: u8,
    ) -> Result<()> {
        handle
            .address()
            .add(index, IpAddr::V4(address), prefix_len)
            .execute()
            .await
            .map_err(|e| failed("add address", e))
    }

    pub async fn ipv4_address(handle: &Handle, index: u32) -> Result<Option<(Ipv4Addr, u8)>> {
        let messages = ipv4_addresses(handle, index).await?;
        Ok(messages.iter().find_map(|message| {
            message.attributes.iter().find_map(|attribute| match attribute {
                AddressAttribute::Address(IpAddr::V4(address)) => {
                    Some((*address, message.header.prefix_len))
                }
                _ => None,
            })
        }))
    }

    async fn default_routes(handle: &Handle, index: u32) -> Result<Vec<RouteMessage>> {
        let query = RouteMessageBuilder::<Ipv4Addr>::default().build();
        let mut routes = pin!(handle.route().get(query).execute());

        let mut found = Vec::new();
        while let Some(route) = routes
            .try_next()
            .await
            .map_err(|e| failed("dump routes", e))?
        {
            let through_link = route
                .attributes
                .iter()
                .any(|attribute| matches!(attribute, RouteAttribute::Oif(oif) if *oif == index));
            if route.header.destination_prefix_length == 0 && through_link {
                found.push(route);
            }
        }
        Ok(found)
    }

    fn gateway_of(route: &RouteMessage) -> Option<Ipv4Addr> {
        route.attributes.iter().find_map(|attribute| match attribute {
            RouteAttribute::Gateway(RouteAddress::Inet(gateway)) => Some(*gateway),
            _ => None,
        })
    }

    pub async fn default_gateway(handle: &Handle, index: u32) -> Result<Option<Ipv4Addr>> {
        let routes = default_routes(handle, index).await?;
        Ok(routes.iter().find_map(gateway_of))
    }

    pub async fn replace_default_route(
        handle: &Handle,
        index: u32,
        gateway: Ipv4Addr,
    ) -> Result<()> {
        for route in default_routes(handle, index).await? {
            handle
                .route()
                .del(route)
                .execute()
                .await
                .map_err(|e| failed("delete default route", e))?;
        }

        let route = RouteMessageBuilder::<Ipv4Addr>::default()
            .destination_prefix(Ipv4Addr::UNSPECIFIED, 0)
            .output_interface(index)
            .gateway(gateway)
            .build();
        handle
            .route()
            .add(route)
            .execute()
            .await
            .map_err(|e| failed("add default route", e))
    }

    pub async fn flush_neighbours(handle: &Handle, index: u32) -> Result<()> {
        let mut neighbours = pin!(handle.neighbours().get().execute());

        let mut stale = Vec::new();
        while let Some(neighbour) = neighbours
            .try_next()
            .await
            .map_err(|e| failed("dump neighbours", e))?
        {
            if neighbour.header.ifindex == index {
                stale.push(neighbour);
            }
        }

        // Permanent entries refuse deletion, like `ip neigh flush`
        for neighbour in stale {
            if let Err(e) = handle.neighbours().del(neighbour).execute().await {
                debug!("Keeping neighbour entry on link {}: {}", index, e);
            }
        }
        Ok(())
    }
}
