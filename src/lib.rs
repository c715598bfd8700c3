pub mod config;
pub mod error;
pub mod layers;
pub mod transport;

pub use self::error::Error;

use self::{
    config::{Config, TransportKind},
    layers::{PacketLogger, Reflector},
    transport::{Transport, TransportRecv, TransportWrite, end_channel, stack},
};

use std::{sync::Arc, time::Duration};

use tokio::time::timeout;

/// How long the runner waits for each receive loop to acknowledge a close.
///
/// A loop observes the close request within one read deadline, this only
/// guards against a loop stuck inside an upper layer callback.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `transport` with `upper` on top until `shutdown` resolves.
///
/// Listens, waits for `shutdown`, requests the receive loops to stop and
/// drains their end values. Returns how many loops acknowledged.
pub async fn run_until<T, U, F>(transport: Arc<T>, upper: Arc<U>, shutdown: F) -> anyhow::Result<usize>
where
    T: Transport + 'static,
    U: TransportRecv + TransportWrite + 'static,
    F: Future<Output = ()>,
{
    let (sender, mut receiver) = end_channel();
    transport.set_end_channel(sender);

    stack(&transport, &upper);
    transport.listen_on_transports()?;

    log::info!(
        "transport running: data={:?}, ctrl={:?}, loops={}",
        transport.local_data_addr(),
        transport.local_ctrl_addr(),
        transport.active_loops()
    );

    shutdown.await;
    transport.close_recv();

    let mut stopped = 0;
    while stopped < transport.active_loops() {
        match timeout(SHUTDOWN_TIMEOUT, receiver.recv()).await {
            Ok(Some(end)) => {
                log::info!("receive loop stopped: end={end:?}");

                stopped += 1;
            }
            Ok(None) => break,
            Err(_) => {
                log::error!(
                    "receive loops did not stop in time: stopped={stopped}, expected={}",
                    transport.active_loops()
                );

                break;
            }
        }
    }

    transport.close_write();

    Ok(stopped)
}

async fn serve<T, F>(transport: T, config: &Config, shutdown: F) -> anyhow::Result<()>
where
    T: Transport + 'static,
    F: Future<Output = ()>,
{
    let transport = Arc::new(transport);
    if config.reflect {
        run_until(transport, Arc::new(Reflector::default()), shutdown).await?;
    } else {
        run_until(transport, Arc::new(PacketLogger::default()), shutdown).await?;
    }

    Ok(())
}

/// In order to let the integration test directly use the crate and start the
/// transport, a function is opened to replace the main function.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    let options = config.transport.options()?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for ctrl-c: err={e}");
        }
    };

    match config.transport.kind {
        #[cfg(feature = "udp")]
        TransportKind::Udp => {
            let transport = transport::udp::TransportUdp::with_options(options)?;
            serve(transport, &config, shutdown).await
        }
        #[cfg(feature = "multicast")]
        TransportKind::Multicast => {
            let transport = transport::multicast::TransportMulticast::with_options(options)?;
            serve(transport, &config, shutdown).await
        }
        #[cfg(feature = "tcp")]
        TransportKind::Tcp => {
            let transport = transport::tcp::TransportTcp::with_options(options)?;
            serve(transport, &config, shutdown).await
        }
        #[allow(unreachable_patterns)]
        kind => Err(anyhow::anyhow!("transport {kind:?} is not enabled in this build")),
    }
}
