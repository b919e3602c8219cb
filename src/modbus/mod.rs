pub mod frame;

use crate::prelude::*;

use arc_swap::ArcSwap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_serial::SerialStream;

use crate::meter::{Device, Values};
use crate::sunspec::RegisterMap;

/// SunSpec register snapshot service: keeps the 65,536-register map current
/// from meter updates and serves it read-only over Modbus-TCP (multi-client)
/// or Modbus-RTU (single master).
///
/// Writers build a fresh snapshot offline and publish it atomically; request
/// handlers load the handle once per reply, so a response never mixes two
/// snapshot versions.
#[derive(Clone)]
pub struct ModbusSlave {
    config: config::Modbus,
    shutdown: Shutdown,
    registers: Arc<ArcSwap<RegisterMap>>,
    device_latched: Arc<AtomicBool>,
}

impl ModbusSlave {
    pub fn new(config: config::Modbus, shutdown: Shutdown) -> Self {
        let map = RegisterMap::new(config.slave_id(), config.use_float_model);
        Self {
            registers: Arc::new(ArcSwap::from_pointee(map)),
            device_latched: Arc::new(AtomicBool::new(false)),
            config,
            shutdown,
        }
    }

    /// Current snapshot handle.
    pub fn snapshot(&self) -> Arc<RegisterMap> {
        self.registers.load_full()
    }

    /// Rotate a new snapshot with this telegram's measurements.
    pub fn update_values(&self, values: &Values) {
        if !self.shutdown.is_running() {
            trace!("update_values(): shutdown in progress");
            return;
        }

        let mut map = RegisterMap::clone(&self.registers.load());
        map.apply_values(values, self.config.use_float_model);
        self.registers.store(Arc::new(map));
    }

    /// Write the device identity once; later calls are no-ops.
    pub fn update_device(&self, device: &Device) {
        if !self.shutdown.is_running() {
            trace!("update_device(): shutdown in progress");
            return;
        }
        if self.device_latched.load(Ordering::SeqCst) {
            return;
        }

        let mut map = RegisterMap::clone(&self.registers.load());
        match map.apply_device(device) {
            Ok(()) => {
                self.registers.store(Arc::new(map));
                self.device_latched.store(true, Ordering::SeqCst);
            }
            Err(err) => {
                self.handle_error(&err);
            }
        }
    }

    pub async fn start(&self) -> Result<()> {
        if let Some(tcp) = self.config.tcp.clone() {
            let listener = match TcpListener::bind((tcp.listen.as_str(), tcp.port)).await {
                Ok(listener) => listener,
                Err(err) => {
                    self.handle_error(&Error::io(
                        format!(
                            "failed to start Modbus TCP listener on '{}:{}'",
                            tcp.listen, tcp.port
                        ),
                        err,
                    ));
                    return Ok(());
                }
            };
            info!("Started Modbus TCP listener on '{}:{}'", tcp.listen, tcp.port);
            self.serve_tcp(listener).await;
        } else if let Some(rtu) = self.config.rtu.clone() {
            self.serve_rtu(&rtu).await;
        }

        Ok(())
    }

    /// Accept loop: one worker task per client, all joined on shutdown.
    pub async fn serve_tcp(&self, listener: TcpListener) {
        let workers: Mutex<Vec<JoinHandle<()>>> = Mutex::new(Vec::new());

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let slave = self.clone();
                        let handle = tokio::spawn(async move {
                            slave.tcp_client_worker(stream, peer).await;
                        });
                        let mut workers = workers.lock().unwrap();
                        workers.retain(|worker| !worker.is_finished());
                        workers.push(handle);
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        if self.handle_error(&Error::io("accept failed", err))
                            == ErrorAction::Shutdown
                        {
                            break;
                        }
                    }
                },
                _ = self.shutdown.wait() => break,
            }
        }

        // Closing the listener refuses pending connects; the workers observe
        // the shutdown flag themselves.
        drop(listener);
        let handles: Vec<_> = workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        debug!("Modbus TCP slave run loop stopped");
    }

    async fn tcp_client_worker(&self, mut stream: TcpStream, peer: SocketAddr) {
        info!("Client connected from {}", peer);

        let request_timeout = self.config.request_timeout();
        let idle_timeout = self.config.idle_timeout();
        let mut last_activity = Instant::now();

        while self.shutdown.is_running() {
            let mut header = [0u8; frame::MBAP_HEADER_LEN];

            let received = tokio::select! {
                result = tokio::time::timeout(request_timeout, stream.read_exact(&mut header)) => result,
                _ = self.shutdown.wait() => break,
            };
            match received {
                Err(_elapsed) => {
                    if last_activity.elapsed() > idle_timeout {
                        info!(
                            "Client {} idle timeout ({}s), disconnecting",
                            peer,
                            idle_timeout.as_secs()
                        );
                        break;
                    }
                    continue;
                }
                Ok(Err(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    info!("Client {} closed connection", peer);
                    break;
                }
                Ok(Err(err)) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Ok(Err(err)) => {
                    info!("Client {} disconnected: {}", peer, err);
                    break;
                }
                Ok(Ok(_)) => {}
            }

            let header = match frame::decode_mbap_header(&header) {
                Ok(header) => header,
                Err(err) => {
                    warn!("Client {} sent a malformed header: {}", peer, err);
                    break;
                }
            };

            let mut pdu = vec![0u8; header.length as usize - 1];
            match tokio::time::timeout(request_timeout, stream.read_exact(&mut pdu)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    info!("Client {} disconnected: {}", peer, err);
                    break;
                }
                Err(_elapsed) => {
                    info!("Client {} stalled mid request, disconnecting", peer);
                    break;
                }
            }

            // Frames addressed to other unit ids are not ours to answer.
            if header.unit_id != self.config.slave_id()
                && header.unit_id != frame::TCP_DONT_CARE_UNIT
            {
                debug!(
                    "Client {}: ignoring request for unit {}",
                    peer, header.unit_id
                );
                continue;
            }

            last_activity = Instant::now();
            let reply_start = Instant::now();

            let response = match frame::decode_request_pdu(&pdu) {
                Ok(frame::Request::Read(read)) => match self.execute_read(&read) {
                    Ok(words) => frame::encode_tcp_response(
                        header.transaction,
                        header.unit_id,
                        read.function,
                        &words,
                    ),
                    Err(code) => frame::encode_tcp_exception(
                        header.transaction,
                        header.unit_id,
                        read.function,
                        code,
                    ),
                },
                Ok(frame::Request::Unsupported { function }) => {
                    debug!(
                        "Client {}: unsupported function 0x{:02X}",
                        peer, function
                    );
                    frame::encode_tcp_exception(
                        header.transaction,
                        header.unit_id,
                        function,
                        frame::EXCEPTION_ILLEGAL_FUNCTION,
                    )
                }
                Err(err) => {
                    warn!("Client {} sent a malformed request: {}", peer, err);
                    break;
                }
            };

            if let Err(err) = stream.write_all(&response).await {
                info!("Client {} disconnected: {}", peer, err);
                break;
            }

            if log::log_enabled!(log::Level::Trace) {
                trace!("modbus reply took {} µs", reply_start.elapsed().as_micros());
            }
        }
    }

    /// Single-master request loop owning the RTU serial port.
    async fn serve_rtu(&self, rtu: &config::ModbusRtu) {
        let settings = rtu.serial();
        let builder = tokio_serial::new(&rtu.device, settings.baud)
            .data_bits(settings.data_bits())
            .stop_bits(settings.stop_bits())
            .parity(settings.parity.to_serial());

        let mut port = match SerialStream::open(&builder) {
            Ok(port) => port,
            Err(err) => {
                self.handle_error(&Error::serial("opening RTU serial device failed", err));
                return;
            }
        };
        if let Err(err) = port.set_exclusive(true) {
            self.handle_error(&Error::serial("failed to set exclusive mode", err));
            return;
        }

        info!(
            "Started Modbus RTU listener on '{}' ({})",
            rtu.device,
            settings.describe()
        );

        let request_timeout = self.config.request_timeout();
        let idle_timeout = self.config.idle_timeout();
        let mut last_activity = Instant::now();
        let mut active = false;

        while self.shutdown.is_running() {
            let mut request = [0u8; frame::RTU_REQUEST_LEN];

            let received = tokio::select! {
                result = tokio::time::timeout(request_timeout, port.read_exact(&mut request)) => result,
                _ = self.shutdown.wait() => break,
            };
            match received {
                Err(_elapsed) => {
                    if active && last_activity.elapsed() > idle_timeout {
                        info!(
                            "Client disconnected, idle for {}s",
                            idle_timeout.as_secs()
                        );
                        last_activity = Instant::now();
                        active = false;
                    }
                    continue;
                }
                Ok(Err(err)) => {
                    if self.handle_error(&Error::io("RTU receive failed", err))
                        == ErrorAction::Shutdown
                    {
                        break;
                    }
                    self.rtu_resync(&mut port).await;
                    continue;
                }
                Ok(Ok(_)) => {}
            }

            match frame::decode_rtu_request(&request) {
                Ok((unit, decoded)) if unit == self.config.slave_id() => {
                    if !active {
                        info!(
                            "Client connected (slave_id={}, request_timeout={}s, idle_timeout={}s)",
                            unit,
                            request_timeout.as_secs(),
                            idle_timeout.as_secs()
                        );
                        active = true;
                    }
                    last_activity = Instant::now();
                    let reply_start = Instant::now();

                    let response = match decoded {
                        frame::Request::Read(read) => match self.execute_read(&read) {
                            Ok(words) => {
                                frame::encode_rtu_response(unit, read.function, &words)
                            }
                            Err(code) => {
                                frame::encode_rtu_exception(unit, read.function, code)
                            }
                        },
                        frame::Request::Unsupported { function } => frame::encode_rtu_exception(
                            unit,
                            function,
                            frame::EXCEPTION_ILLEGAL_FUNCTION,
                        ),
                    };

                    if let Err(err) = tokio::io::AsyncWriteExt::write_all(&mut port, &response).await {
                        if self.handle_error(&Error::io("RTU reply failed", err))
                            == ErrorAction::Shutdown
                        {
                            break;
                        }
                        continue;
                    }

                    if log::log_enabled!(log::Level::Trace) {
                        trace!("modbus reply took {} µs", reply_start.elapsed().as_micros());
                    }
                }
                // Frame for another slave: ignored, keep listening.
                Ok(_) => {}
                Err(err) => {
                    debug!("RTU receive error: {}", err);
                    self.rtu_resync(&mut port).await;
                }
            }
        }

        debug!("Modbus RTU slave run loop stopped");
    }

    /// After a CRC mismatch, drop bytes until the line goes quiet so the next
    /// read starts on a frame boundary.
    async fn rtu_resync(&self, port: &mut SerialStream) {
        let mut buf = [0u8; 64];
        while let Ok(Ok(received)) =
            tokio::time::timeout(Duration::from_millis(50), port.read(&mut buf)).await
        {
            if received == 0 {
                break;
            }
        }
    }

    /// Serve one read from a single snapshot version.
    fn execute_read(&self, request: &frame::ReadRequest) -> Result<Vec<u16>, u8> {
        if request.count == 0 || request.count > frame::MAX_READ_REGISTERS {
            return Err(frame::EXCEPTION_ILLEGAL_DATA_VALUE);
        }

        let map = self.registers.load();
        map.read(request.addr, request.count)
            .map(<[u16]>::to_vec)
            .ok_or(frame::EXCEPTION_ILLEGAL_DATA_ADDRESS)
    }

    fn handle_error(&self, err: &Error) -> ErrorAction {
        match err.severity() {
            Severity::Fatal => {
                error!("FATAL Modbus error: {}", err);
                self.shutdown.shutdown();
                ErrorAction::Shutdown
            }
            Severity::Transient => {
                warn!("Transient Modbus error: {}", err);
                ErrorAction::Reconnect
            }
            Severity::Shutdown => {
                trace!("Modbus operation cancelled: {}", err);
                ErrorAction::Shutdown
            }
        }
    }
}
