//! BLE link controller adapter.
//!
//! Implements [`LinkController`], the hexagonal boundary between the session
//! core and the radio stack.  Controller callbacks never touch the session:
//! they translate into [`LinkEvent`]s and post them to an [`EventMailbox`]
//! drained by the main loop.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GAP/GATTS via `esp_idf_svc::sys`.
//! - **all other targets**: an in-memory simulation with `sim_*` drivers for
//!   host-side tests and demos.
//!
//! ## Event mapping (Bluedroid)
//!
//! | Bluedroid event                      | LinkEvent                      |
//! |--------------------------------------|--------------------------------|
//! | `ESP_GATTS_CONNECT_EVT`              | `Connected`                    |
//! | `ESP_GATTS_DISCONNECT_EVT`           | `Disconnected`                 |
//! | `ESP_GAP_BLE_UPDATE_CONN_PARAMS_EVT` | `ParamUpdateSucceeded/Failed`  |
//! | `ESP_GAP_BLE_ADV_START_COMPLETE_EVT` | `AdvertisingStateChanged`      |
//! | adapter-side advertising deadline    | `AdvertisingStateChanged(TimedOut)` |
//! | anything else                        | `Unknown(code)`                |

use log::{debug, info, warn};

use crate::app::events::{AdvertisingEvent, LinkEvent};
use crate::app::ports::{LinkController, Phy};
use crate::config::{AdvertisingConfig, ConnectionParams, LinkParams};
use crate::error::ControllerError;
use crate::events::EventMailbox;
use crate::session::address::DeviceAddress;
use crate::session::advertising::{AdvertisingMode, build_adv_payload};
use crate::session::connection::{ConnectionHandle, DisconnectReason};

/// Mailbox the firmware binary drains.  Tests usually bring their own.
pub static LINK_EVENTS: EventMailbox = EventMailbox::new();

/// Advertising interval for `mode`, in 0.625 ms units.
fn interval_for(config: &AdvertisingConfig, mode: AdvertisingMode) -> u16 {
    match (mode, config.slow) {
        (AdvertisingMode::Slow, Some(slow)) => slow.interval,
        _ => config.fast_interval,
    }
}

/// Seconds the controller should advertise in `mode`; 0 = until stopped.
fn timeout_for(config: &AdvertisingConfig, mode: AdvertisingMode) -> u16 {
    match (mode, config.slow) {
        (AdvertisingMode::Slow, Some(slow)) => slow.timeout_secs,
        (AdvertisingMode::Slow, None) => 0,
        (AdvertisingMode::Fast, _) => config.fast_timeout_secs,
    }
}

fn entered_event(mode: AdvertisingMode) -> LinkEvent {
    LinkEvent::AdvertisingStateChanged(match mode {
        AdvertisingMode::Fast => AdvertisingEvent::FastModeEntered,
        AdvertisingMode::Slow => AdvertisingEvent::SlowModeEntered,
    })
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF: Bluedroid
// ───────────────────────────────────────────────────────────────

// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures.  These statics bridge the callback context to the adapter.

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicU16, AtomicU8, Ordering as AtomicOrdering};

#[cfg(target_os = "espidf")]
static MAILBOX: std::sync::OnceLock<&'static EventMailbox> = std::sync::OnceLock::new();

/// Live links: (conn_id, peer address).  Bluedroid addresses most GAP
/// commands by peer address, the session by handle.
#[cfg(target_os = "espidf")]
static PEERS: std::sync::Mutex<heapless::Vec<(u16, [u8; 6]), 2>> =
    std::sync::Mutex::new(heapless::Vec::new());

/// 0 = idle, 1 = fast, 2 = slow.
#[cfg(target_os = "espidf")]
static ADV_MODE: AtomicU8 = AtomicU8::new(0);
#[cfg(target_os = "espidf")]
static GATTS_IF: AtomicU16 = AtomicU16::new(0);

#[cfg(target_os = "espidf")]
fn post(event: LinkEvent) {
    if let Some(mailbox) = MAILBOX.get() {
        if !mailbox.post_link(event) {
            log::warn!("BLE: mailbox full, {:?} dropped", event);
        }
    }
}

#[cfg(target_os = "espidf")]
fn peer_of(handle: ConnectionHandle) -> Option<[u8; 6]> {
    PEERS.lock().ok().and_then(|peers| {
        peers
            .iter()
            .find(|(id, _)| *id == handle.raw())
            .map(|(_, bda)| *bda)
    })
}

#[cfg(target_os = "espidf")]
fn handle_of(bda: &[u8; 6]) -> ConnectionHandle {
    PEERS
        .lock()
        .ok()
        .and_then(|peers| peers.iter().find(|(_, b)| b == bda).map(|(id, _)| *id))
        .map_or(ConnectionHandle::INVALID, ConnectionHandle::new)
}

#[cfg(target_os = "espidf")]
fn check(ret: esp_idf_svc::sys::esp_err_t) -> Result<(), ControllerError> {
    use esp_idf_svc::sys::*;
    match ret as u32 {
        ESP_OK => Ok(()),
        ESP_ERR_INVALID_STATE => Err(ControllerError::InvalidState),
        ESP_ERR_INVALID_ARG => Err(ControllerError::InvalidParam),
        ESP_ERR_NO_MEM => Err(ControllerError::Busy),
        other => Err(ControllerError::Vendor(other)),
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_RAW_SET_COMPLETE_EVT
        | esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT
        | esp_gap_ble_cb_event_t_ESP_GAP_BLE_SET_STATIC_RAND_ADDR_EVT => {}
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            let status = unsafe { (*param).adv_start_cmpl.status };
            if status != esp_bt_status_t_ESP_BT_STATUS_SUCCESS {
                log::warn!("BLE GAP: advertising start failed (status {})", status);
                return;
            }
            match ADV_MODE.load(AtomicOrdering::Relaxed) {
                1 => post(entered_event(AdvertisingMode::Fast)),
                2 => post(entered_event(AdvertisingMode::Slow)),
                _ => {}
            }
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_UPDATE_CONN_PARAMS_EVT => {
            let p = unsafe { &(*param).update_conn_params };
            let handle = handle_of(&p.bda);
            if p.status == esp_bt_status_t_ESP_BT_STATUS_SUCCESS {
                post(LinkEvent::ParamUpdateSucceeded {
                    handle,
                    params: LinkParams {
                        interval: p.conn_int,
                        latency: p.latency,
                        supervision_timeout: p.timeout,
                    },
                });
            } else {
                post(LinkEvent::ParamUpdateFailed { handle });
            }
        }
        other => post(LinkEvent::Unknown(other as u16)),
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            GATTS_IF.store(u16::from(gatts_if), AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: app registered (if={})", gatts_if);
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let p = unsafe { &(*param).connect };
            // The controller halts advertising on connect.
            ADV_MODE.store(0, AtomicOrdering::Relaxed);
            if let Ok(mut peers) = PEERS.lock() {
                if peers.push((p.conn_id, p.remote_bda)).is_err() {
                    log::warn!("BLE GATTS: peer table full");
                }
            }
            post(LinkEvent::Connected {
                handle: ConnectionHandle::new(p.conn_id),
                params: LinkParams {
                    interval: p.conn_params.interval,
                    latency: p.conn_params.latency,
                    supervision_timeout: p.conn_params.timeout,
                },
            });
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let p = unsafe { &(*param).disconnect };
            if let Ok(mut peers) = PEERS.lock() {
                peers.retain(|(id, _)| *id != p.conn_id);
            }
            post(LinkEvent::Disconnected {
                handle: ConnectionHandle::new(p.conn_id),
                reason: p.reason as u8,
            });
        }
        _ => {}
    }
}

/// Bluedroid-backed link controller.
#[cfg(target_os = "espidf")]
pub struct BleLinkAdapter {
    /// Last advertising start, replayed around address changes.
    last_start: Option<(AdvertisingConfig, AdvertisingMode)>,
    /// Adapter-side advertising deadline (µs since boot).
    adv_deadline_us: Option<u64>,
}

#[cfg(target_os = "espidf")]
impl BleLinkAdapter {
    /// Bind the adapter to `mailbox`.  Only the first binding takes effect.
    pub fn new(mailbox: &'static EventMailbox) -> Self {
        let _ = MAILBOX.set(mailbox);
        Self {
            last_start: None,
            adv_deadline_us: None,
        }
    }

    /// Bring up the controller and Bluedroid and register callbacks.
    pub fn init(&mut self, device_name: &str) -> Result<(), ControllerError> {
        use esp_idf_svc::sys::*;
        unsafe {
            // BLE-only mode frees the classic BT memory.
            check(esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT))?;
            let mut bt_cfg = esp_bt_controller_config_t::default();
            check(esp_bt_controller_init(&mut bt_cfg))?;
            check(esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE))?;
            check(esp_bluedroid_init())?;
            check(esp_bluedroid_enable())?;
            check(esp_ble_gap_register_callback(Some(ble_gap_event_handler)))?;
            check(esp_ble_gatts_register_callback(Some(ble_gatts_event_handler)))?;
            check(esp_ble_gatts_app_register(0))?;

            let mut name: heapless::Vec<u8, 32> = heapless::Vec::new();
            let _ = name.extend_from_slice(device_name.as_bytes());
            let _ = name.push(0);
            check(esp_ble_gap_set_device_name(name.as_ptr().cast()))?;
        }
        info!("BLE(espidf): Bluedroid up as '{}'", device_name);
        Ok(())
    }

    /// Report an expired advertising phase.  Call from the main loop.
    pub fn poll(&mut self) {
        let Some(deadline) = self.adv_deadline_us else { return };
        let now = unsafe { esp_idf_svc::sys::esp_timer_get_time() } as u64;
        if now < deadline {
            return;
        }
        self.adv_deadline_us = None;
        unsafe {
            let _ = check(esp_idf_svc::sys::esp_ble_gap_stop_advertising());
        }
        ADV_MODE.store(0, AtomicOrdering::Relaxed);
        post(LinkEvent::AdvertisingStateChanged(AdvertisingEvent::TimedOut));
    }

    fn start_raw(
        &mut self,
        config: &AdvertisingConfig,
        mode: AdvertisingMode,
    ) -> Result<(), ControllerError> {
        use esp_idf_svc::sys::*;
        let mut payload =
            build_adv_payload(config).map_err(|_| ControllerError::InvalidParam)?;
        let interval = interval_for(config, mode);
        unsafe {
            check(esp_ble_gap_config_adv_data_raw(
                payload.as_mut_ptr(),
                payload.len() as u32,
            ))?;
            let mut adv_params = esp_ble_adv_params_t {
                adv_int_min: interval,
                adv_int_max: interval,
                adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
                own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_RANDOM,
                channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
                adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
                ..core::mem::zeroed()
            };
            check(esp_ble_gap_start_advertising(&mut adv_params))?;
        }
        ADV_MODE.store(
            match mode {
                AdvertisingMode::Fast => 1,
                AdvertisingMode::Slow => 2,
            },
            AtomicOrdering::Relaxed,
        );
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
impl LinkController for BleLinkAdapter {
    fn start_advertising(
        &mut self,
        config: &AdvertisingConfig,
        mode: AdvertisingMode,
    ) -> Result<(), ControllerError> {
        if ADV_MODE.load(AtomicOrdering::Relaxed) != 0 {
            return Err(ControllerError::InvalidState);
        }
        self.start_raw(config, mode)?;
        let timeout = timeout_for(config, mode);
        self.adv_deadline_us = (timeout != 0).then(|| {
            let now = unsafe { esp_idf_svc::sys::esp_timer_get_time() } as u64;
            now + u64::from(timeout) * 1_000_000
        });
        self.last_start = Some((config.clone(), mode));
        info!("BLE(espidf): advertising {:?} (interval {})", mode, interval_for(config, mode));
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), ControllerError> {
        if ADV_MODE.load(AtomicOrdering::Relaxed) == 0 {
            return Err(ControllerError::InvalidState);
        }
        unsafe { check(esp_idf_svc::sys::esp_ble_gap_stop_advertising())? };
        ADV_MODE.store(0, AtomicOrdering::Relaxed);
        self.adv_deadline_us = None;
        Ok(())
    }

    fn set_address(&mut self, address: &DeviceAddress) -> Result<(), ControllerError> {
        // Bluedroid takes the address most significant byte first.
        let mut bda = address.bytes();
        bda.reverse();

        // The controller refuses a new random address while advertising.
        let restart = match (ADV_MODE.load(AtomicOrdering::Relaxed), &self.last_start) {
            (0, _) | (_, None) => None,
            (_, Some((config, mode))) => Some((config.clone(), *mode)),
        };
        if restart.is_some() {
            unsafe { check(esp_idf_svc::sys::esp_ble_gap_stop_advertising())? };
            ADV_MODE.store(0, AtomicOrdering::Relaxed);
        }
        let applied =
            unsafe { check(esp_idf_svc::sys::esp_ble_gap_set_rand_addr(bda.as_mut_ptr())) };

        // Advertising resumes under whichever address is now in force.  If it
        // cannot, the session hears about it as an ended advertising phase.
        if let Some((config, mode)) = restart {
            if let Err(e) = self.start_raw(&config, mode) {
                warn!("BLE(espidf): advertising lost across address change ({})", e);
                self.adv_deadline_us = None;
                post(LinkEvent::AdvertisingStateChanged(AdvertisingEvent::TimedOut));
            }
        }
        applied?;
        debug!("BLE(espidf): random address {}", address);
        Ok(())
    }

    fn request_param_update(
        &mut self,
        handle: ConnectionHandle,
        params: &ConnectionParams,
    ) -> Result<(), ControllerError> {
        let bda = peer_of(handle).ok_or(ControllerError::UnknownHandle)?;
        let mut update = esp_idf_svc::sys::esp_ble_conn_update_params_t {
            bda,
            min_int: params.min_interval,
            max_int: params.max_interval,
            latency: params.slave_latency,
            timeout: params.supervision_timeout,
        };
        unsafe { check(esp_idf_svc::sys::esp_ble_gap_update_conn_params(&mut update)) }
    }

    fn disconnect(
        &mut self,
        handle: ConnectionHandle,
        reason: DisconnectReason,
    ) -> Result<(), ControllerError> {
        let mut bda = peer_of(handle).ok_or(ControllerError::UnknownHandle)?;
        // Bluedroid picks the HCI reason itself.
        debug!("BLE(espidf): disconnect {} (requested reason 0x{:02x})", handle, reason.0);
        unsafe { check(esp_idf_svc::sys::esp_ble_gap_disconnect(bda.as_mut_ptr())) }
    }

    fn update_phy(
        &mut self,
        handle: ConnectionHandle,
        tx: Phy,
        rx: Phy,
    ) -> Result<(), ControllerError> {
        const NO_TX_PREFERENCE: u8 = 0x01;
        const NO_RX_PREFERENCE: u8 = 0x02;
        fn mask(phy: Phy) -> u8 {
            match phy {
                Phy::Auto => 0b111,
                Phy::Le1M => 0b001,
                Phy::Le2M => 0b010,
                Phy::Coded => 0b100,
            }
        }
        let mut bda = peer_of(handle).ok_or(ControllerError::UnknownHandle)?;
        let mut all_phys = 0;
        if tx == Phy::Auto {
            all_phys |= NO_TX_PREFERENCE;
        }
        if rx == Phy::Auto {
            all_phys |= NO_RX_PREFERENCE;
        }
        unsafe {
            check(esp_idf_svc::sys::esp_ble_gap_set_preferred_phy(
                bda.as_mut_ptr(),
                all_phys as _,
                mask(tx) as _,
                mask(rx) as _,
                0 as _,
            ))
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Host simulation
// ───────────────────────────────────────────────────────────────

/// Simulated link controller.  Behaves like a single-link controller:
/// advertising halts on connect, commands on unknown handles fail, and
/// every state change is reported through the mailbox.
#[cfg(not(target_os = "espidf"))]
pub struct BleLinkAdapter {
    mailbox: &'static EventMailbox,
    advertising: Option<AdvertisingMode>,
    address: Option<DeviceAddress>,
    live: Option<ConnectionHandle>,
    param_requests: u32,
    /// Failure for the next advertising restart around an address change.
    restart_failure: Option<ControllerError>,
}

#[cfg(not(target_os = "espidf"))]
impl BleLinkAdapter {
    pub fn new(mailbox: &'static EventMailbox) -> Self {
        Self {
            mailbox,
            advertising: None,
            address: None,
            live: None,
            param_requests: 0,
            restart_failure: None,
        }
    }

    pub fn init(&mut self, device_name: &str) -> Result<(), ControllerError> {
        info!("BLE(sim): controller up as '{}'", device_name);
        Ok(())
    }

    pub fn poll(&mut self) {}

    pub fn advertising(&self) -> Option<AdvertisingMode> {
        self.advertising
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        self.address
    }

    pub fn live(&self) -> Option<ConnectionHandle> {
        self.live
    }

    pub fn param_requests(&self) -> u32 {
        self.param_requests
    }

    fn post(&self, event: LinkEvent) {
        if !self.mailbox.post_link(event) {
            warn!("BLE(sim): mailbox full, {:?} dropped", event);
        }
    }

    /// A central connects.
    pub fn sim_connect(&mut self, handle: ConnectionHandle, params: LinkParams) {
        self.advertising = None;
        if self.live.is_none() {
            self.live = Some(handle);
        }
        self.post(LinkEvent::Connected { handle, params });
    }

    /// The central drops the link.
    pub fn sim_disconnect(&mut self, reason: u8) {
        if let Some(handle) = self.live.take() {
            self.post(LinkEvent::Disconnected { handle, reason });
        }
    }

    /// The central answers a parameter request.
    pub fn sim_param_update(&mut self, applied: Option<LinkParams>) {
        let Some(handle) = self.live else { return };
        self.post(match applied {
            Some(params) => LinkEvent::ParamUpdateSucceeded { handle, params },
            None => LinkEvent::ParamUpdateFailed { handle },
        });
    }

    /// The central asks for a PHY change.
    pub fn sim_phy_request(&mut self) {
        if let Some(handle) = self.live {
            self.post(LinkEvent::PhyUpdateRequested { handle });
        }
    }

    /// The next address change cannot resume advertising.
    pub fn sim_fail_next_restart(&mut self, error: ControllerError) {
        self.restart_failure = Some(error);
    }

    /// The current advertising phase ends.
    pub fn sim_advertising_timeout(&mut self) {
        if self.advertising.take().is_some() {
            self.post(LinkEvent::AdvertisingStateChanged(AdvertisingEvent::TimedOut));
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl LinkController for BleLinkAdapter {
    fn start_advertising(
        &mut self,
        config: &AdvertisingConfig,
        mode: AdvertisingMode,
    ) -> Result<(), ControllerError> {
        if self.advertising.is_some() || self.live.is_some() {
            return Err(ControllerError::InvalidState);
        }
        let payload = build_adv_payload(config).map_err(|_| ControllerError::InvalidParam)?;
        self.advertising = Some(mode);
        info!(
            "BLE(sim): advertising {:?} (interval {}, timeout {}s, {} bytes)",
            mode,
            interval_for(config, mode),
            timeout_for(config, mode),
            payload.len()
        );
        self.post(entered_event(mode));
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), ControllerError> {
        self.advertising
            .take()
            .map(|_| ())
            .ok_or(ControllerError::InvalidState)
    }

    fn set_address(&mut self, address: &DeviceAddress) -> Result<(), ControllerError> {
        self.address = Some(*address);
        debug!("BLE(sim): random address {}", address);

        // Advertising is restarted around the change, as on Bluedroid.
        if self.advertising.is_some() {
            if let Some(e) = self.restart_failure.take() {
                warn!("BLE(sim): advertising lost across address change ({})", e);
                self.advertising = None;
                self.post(LinkEvent::AdvertisingStateChanged(AdvertisingEvent::TimedOut));
            }
        }
        Ok(())
    }

    fn request_param_update(
        &mut self,
        handle: ConnectionHandle,
        params: &ConnectionParams,
    ) -> Result<(), ControllerError> {
        if self.live != Some(handle) {
            return Err(ControllerError::UnknownHandle);
        }
        self.param_requests += 1;
        debug!(
            "BLE(sim): {} asked for interval {}..{}",
            handle, params.min_interval, params.max_interval
        );
        Ok(())
    }

    fn disconnect(
        &mut self,
        handle: ConnectionHandle,
        reason: DisconnectReason,
    ) -> Result<(), ControllerError> {
        if self.live != Some(handle) {
            return Err(ControllerError::UnknownHandle);
        }
        self.live = None;
        // Locally initiated: the controller reports "terminated by local host".
        self.post(LinkEvent::Disconnected { handle, reason: 0x16 });
        debug!("BLE(sim): {} dropped (reason 0x{:02x})", handle, reason.0);
        Ok(())
    }

    fn update_phy(
        &mut self,
        handle: ConnectionHandle,
        tx: Phy,
        rx: Phy,
    ) -> Result<(), ControllerError> {
        if self.live != Some(handle) {
            return Err(ControllerError::UnknownHandle);
        }
        debug!("BLE(sim): {} PHY tx={:?} rx={:?}", handle, tx, rx);
        Ok(())
    }
}
