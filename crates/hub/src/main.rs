mod actuator;
mod config;
mod controller;
mod matcher;
mod mqtt;
mod policy;
mod snapshot;
mod state;
mod timer;
mod valve;
mod web;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use actuator::MqttActuator;
use controller::Controller;
use mqtt::{
    extract_node_id, extract_station, extract_zone_id, parse_valve_command, ReadingMsg, WeatherMsg,
};
use state::SystemState;
use valve::ValveBoard;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);

    // Many common relay boards are active-low. If yours is active-high, set false.
    let active_low = env::var("RELAY_ACTIVE_LOW")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    let zone_pins = cfg.zone_pins();
    let station = cfg.weather.station.clone();

    for zone in &cfg.zones {
        debug!(zone = %zone.zone_id, name = %zone.display_name(), gpio = zone.valve_gpio_pin, "zone configured");
    }

    // ── Valve board ─────────────────────────────────────────────────
    let mut valves = ValveBoard::new(&zone_pins, active_low)?;
    valves.all_off();

    // ── Shared state ────────────────────────────────────────────────
    let shared = SystemState::shared(&zone_pins);
    shared
        .write()
        .await
        .record_system(format!("hub started with {} zone(s)", valves.len()));

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("lawn-irrigation-hub", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    for topic in ["tele/+/reading", "weather/+/report", "valve/+/set"] {
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
    }
    info!(%station, "hub subscribed to telemetry, weather and valve topics");

    // ── Controller ──────────────────────────────────────────────────
    let actuator = Arc::new(MqttActuator::new(client));
    let controller = Arc::new(Controller::new(
        cfg.irrigation(),
        Arc::clone(&shared),
        actuator,
    ));

    tokio::spawn(controller::run_periodic(
        Arc::clone(&controller),
        Duration::from_secs(cfg.poll_interval_secs()),
    ));

    // ── Web server ──────────────────────────────────────────────────
    let web_state = AppState {
        shared: Arc::clone(&shared),
        controller,
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state).await {
            error!("web server stopped: {e:#}");
        }
    });

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let topic = p.topic.as_str();
                let payload = &p.payload[..];

                if let Some(node_id) = extract_node_id(topic) {
                    match serde_json::from_slice::<ReadingMsg>(payload) {
                        Ok(msg) => {
                            debug!(node = %node_id, ts = msg.ts, readings = msg.readings.len(), "telemetry");
                            shared.write().await.record_moisture(node_id, &msg.readings);
                        }
                        Err(e) => {
                            warn!(%topic, "bad telemetry json: {e}");
                            shared
                                .write()
                                .await
                                .record_error(format!("bad telemetry json: {e}"));
                        }
                    }
                } else if let Some(report_station) = extract_station(topic) {
                    if report_station != station {
                        debug!(station = %report_station, "ignoring report from other station");
                        continue;
                    }
                    match serde_json::from_slice::<WeatherMsg>(payload) {
                        Ok(msg) => {
                            debug!(condition = %msg.condition, precipitation = msg.precipitation, "weather report");
                            shared.write().await.record_weather(report_station, &msg);
                        }
                        Err(e) => {
                            warn!(%topic, "bad weather json: {e}");
                            shared
                                .write()
                                .await
                                .record_error(format!("bad weather json: {e}"));
                        }
                    }
                } else if let Some(zone_id) = extract_zone_id(topic) {
                    match parse_valve_command(payload) {
                        Ok(on) => match valves.set(zone_id, on) {
                            Ok(()) => shared.write().await.record_valve(zone_id, on),
                            Err(e) => {
                                warn!(zone = %zone_id, "valve command rejected: {e:#}");
                                shared.write().await.record_error(format!("{e:#}"));
                            }
                        },
                        Err(msg) => {
                            warn!(zone = %zone_id, "{msg} (use ON/OFF)");
                            shared.write().await.record_error(msg);
                        }
                    }
                } else {
                    debug!(%topic, "unhandled topic");
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                // Fail safe: no valve stays open while the broker is unreachable.
                let were_on = valves.all_off();

                let mut st = shared.write().await;
                for zone_id in &were_on {
                    st.record_valve(zone_id, false);
                }
                st.mqtt_connected = false;
                st.record_error(format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
