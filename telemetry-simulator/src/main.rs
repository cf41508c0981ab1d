/**
 * TELEMETRY SIMULATOR - Publie des données GPS/RFID de test sur un broker MQTT
 *
 * RÔLE :
 * Simule une petite flotte (3 devices, 5 tags) pour alimenter le relais
 * sans matériel réel.
 *
 * FONCTIONNEMENT :
 * - Attend le ConnAck (10s max), sinon sortie en erreur
 * - Publications JSON en QoS 1 sur les topics GPS / RFID
 * - Modes ponctuels (single, all, gps, rfid) ou continus (continuous, mixed)
 * - Ctrl-C interrompt proprement les modes continus
 */

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, error, info, warn};
use rand::Rng;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use std::time::{SystemTime, UNIX_EPOCH};
use telemetry_devkit::{SimDevice, SimTag, TelemetryMessageBuilder, TEST_DEVICES, TEST_TAGS};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};

// ===== Configuration =====
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const STEP_PAUSE: Duration = Duration::from_millis(500);
const PHASE_PAUSE: Duration = Duration::from_secs(1);
const ROUND_INTERVAL: Duration = Duration::from_secs(3);
const JITTER_DEG: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// 1 GPS + 1 RFID
    Single,
    /// Tous les devices puis tous les tags
    All,
    Gps,
    Rfid,
    /// GPS de toute la flotte toutes les 3s
    Continuous,
    /// Continuous + un scan RFID aléatoire par tour
    Mixed,
}

#[derive(Debug, Parser)]
#[command(name = "telemetry-simulator", about = "Publie des données GPS/RFID de test sur un broker MQTT")]
struct Args {
    #[arg(short, long, default_value = "test.mosquitto.org")]
    broker: String,

    #[arg(short, long, default_value_t = 1883)]
    port: u16,

    #[arg(short, long)]
    username: Option<String>,

    #[arg(short = 'w', long)]
    password: Option<String>,

    #[arg(short, long, default_value = "devices/gps")]
    gps_topic: String,

    #[arg(short, long, default_value = "devices/rfid")]
    rfid_topic: String,

    #[arg(short, long, value_enum, default_value_t = Mode::Single)]
    mode: Mode,

    /// Durée des modes continus (secondes)
    #[arg(short, long, default_value_t = 60)]
    duration: u64,
}

struct Publisher {
    client: AsyncClient,
    poller: JoinHandle<()>,
    gps_topic: String,
    rfid_topic: String,
}

impl Publisher {
    async fn connect(args: &Args) -> Result<Self> {
        info!("🔌 Connecting to {}:{}...", args.broker, args.port);

        let mut opts = MqttOptions::new(format!("test_publisher_{}", unix_now()), &args.broker, args.port);
        opts.set_keep_alive(KEEP_ALIVE);
        if let (Some(user), Some(pass)) = (&args.username, &args.password) {
            info!("🔑 Using authentication: {}", user);
            opts.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        timeout(CONNECT_TIMEOUT, wait_connack(&mut eventloop))
            .await
            .map_err(|_| anyhow!("no ConnAck within {}s", CONNECT_TIMEOUT.as_secs()))??;
        info!("✅ Connected to {}:{}", args.broker, args.port);

        // l'eventloop doit tourner pour que les publications QoS 1 partent
        let poller = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        warn!("⚠️ Broker closed the connection");
                        break;
                    }
                    Ok(event) => debug!("📨 {:?}", event),
                    Err(e) => {
                        warn!("⚠️ MQTT connection error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self { client, poller, gps_topic: args.gps_topic.clone(), rfid_topic: args.rfid_topic.clone() })
    }

    async fn publish_gps(&self, device_id: &str, lat: f64, lon: f64) -> Result<()> {
        let payload = TelemetryMessageBuilder::gps_now(device_id, lat, lon);
        self.client
            .publish(self.gps_topic.as_str(), QoS::AtLeastOnce, false, payload.to_string())
            .await
            .context("GPS publish failed")?;
        info!("📍 GPS: {} at ({:.4}, {:.4})", device_id, lat, lon);
        Ok(())
    }

    async fn publish_rfid(&self, device_id: &str, tag: &SimTag, lat: f64, lon: f64) -> Result<()> {
        let payload = TelemetryMessageBuilder::rfid_now(device_id, tag.uid, tag.msg, lat, lon);
        self.client
            .publish(self.rfid_topic.as_str(), QoS::AtLeastOnce, false, payload.to_string())
            .await
            .context("RFID publish failed")?;
        info!("📡 RFID: {} scanned {} at ({:.4}, {:.4})", device_id, tag.uid, lat, lon);
        Ok(())
    }

    async fn all_devices(&self) -> Result<()> {
        info!("[TEST] Publishing GPS for all devices...");
        for device in TEST_DEVICES.iter() {
            self.publish_gps(device.id, device.lat, device.lon).await?;
            sleep(STEP_PAUSE).await;
        }
        Ok(())
    }

    async fn all_tags(&self) -> Result<()> {
        info!("[TEST] Publishing RFID scans for all tags...");
        for (i, tag) in TEST_TAGS.iter().enumerate() {
            let device = &TEST_DEVICES[i % TEST_DEVICES.len()];
            self.publish_rfid(device.id, tag, device.lat, device.lon).await?;
            sleep(STEP_PAUSE).await;
        }
        Ok(())
    }

    /// Tours de publication jusqu'à `duration` ou Ctrl-C. Retourne (gps, rfid) publiés.
    async fn rounds(&self, duration: Duration, with_rfid: bool) -> Result<(usize, usize)> {
        info!("[TEST] Publishing continuously for {}s (Ctrl-C to stop)", duration.as_secs());
        let started = Instant::now();
        let deadline = started + duration;
        let stop = tokio::signal::ctrl_c();
        tokio::pin!(stop);

        let (mut gps, mut rfid) = (0, 0);
        while Instant::now() < deadline {
            for device in TEST_DEVICES.iter() {
                let (lat, lon) = jitter(device);
                self.publish_gps(device.id, lat, lon).await?;
                gps += 1;
            }
            if with_rfid {
                let (device, tag) = pick_scan();
                let (lat, lon) = jitter(&device);
                self.publish_rfid(device.id, &tag, lat, lon).await?;
                rfid += 1;
            }

            tokio::select! {
                _ = &mut stop => {
                    info!("⏹️ Stopped by user");
                    break;
                }
                _ = sleep(ROUND_INTERVAL) => {}
            }
        }

        info!(
            "✅ Published {} GPS + {} RFID in {:.1}s",
            gps,
            rfid,
            started.elapsed().as_secs_f64()
        );
        Ok((gps, rfid))
    }

    async fn run(&self, mode: Mode, duration: Duration) -> Result<()> {
        match mode {
            Mode::Single => {
                let device = &TEST_DEVICES[0];
                self.publish_gps(device.id, device.lat, device.lon).await?;
                sleep(PHASE_PAUSE).await;
                self.publish_rfid(device.id, &TEST_TAGS[0], device.lat, device.lon).await?;
            }
            Mode::All => {
                self.all_devices().await?;
                sleep(PHASE_PAUSE).await;
                self.all_tags().await?;
            }
            Mode::Gps => self.all_devices().await?,
            Mode::Rfid => self.all_tags().await?,
            Mode::Continuous => {
                self.rounds(duration, false).await?;
            }
            Mode::Mixed => {
                self.rounds(duration, true).await?;
            }
        }
        Ok(())
    }

    async fn disconnect(self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("disconnect request not sent: {}", e);
        }
        // laisse l'eventloop vider les QoS 1 en vol puis envoyer le DISCONNECT
        if timeout(Duration::from_secs(2), self.poller).await.is_err() {
            warn!("⚠️ Eventloop did not stop in time");
        }
        info!("✅ Disconnected");
    }
}

async fn wait_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        if let Event::Incoming(Incoming::ConnAck(ack)) = eventloop.poll().await? {
            if ack.code == ConnectReturnCode::Success {
                return Ok(());
            }
            bail!("connection refused: {:?}", ack.code);
        }
    }
}

/// Variation de ±0.01° autour de la position de référence
fn jitter(device: &SimDevice) -> (f64, f64) {
    let mut rng = rand::thread_rng();
    (
        device.lat + rng.gen_range(-JITTER_DEG..=JITTER_DEG),
        device.lon + rng.gen_range(-JITTER_DEG..=JITTER_DEG),
    )
}

fn pick_scan() -> (SimDevice, SimTag) {
    let mut rng = rand::thread_rng();
    (
        TEST_DEVICES[rng.gen_range(0..TEST_DEVICES.len())],
        TEST_TAGS[rng.gen_range(0..TEST_TAGS.len())],
    )
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("🚀 Starting telemetry simulator");
    info!("  Broker: {}:{}", args.broker, args.port);
    info!("  GPS Topic: {}", args.gps_topic);
    info!("  RFID Topic: {}", args.rfid_topic);
    info!("  Mode: {:?}", args.mode);

    let publisher = match Publisher::connect(&args).await {
        Ok(publisher) => publisher,
        Err(e) => {
            error!("❌ Failed to connect to broker: {:#}", e);
            return Err(e);
        }
    };

    let outcome = publisher.run(args.mode, Duration::from_secs(args.duration)).await;
    publisher.disconnect().await;

    if let Err(e) = &outcome {
        error!("❌ Error: {:#}", e);
    }
    outcome
}
