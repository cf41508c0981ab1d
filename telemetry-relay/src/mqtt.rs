use crate::bus::{BrokerSettings, BusConnector, BusEvent, BusLink};
use crate::config::MqttConf;
use crate::contracts::TopicRoutes;
use crate::error::RelayError;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS,
    SubscribeFilter, SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Connecteur rumqttc ; un client MQTT neuf par abonnement
#[derive(Debug, Clone)]
pub struct MqttConnector {
    client_id_prefix: String,
    keep_alive: Duration,
}

impl MqttConnector {
    pub fn new(conf: &MqttConf) -> Self {
        Self {
            client_id_prefix: conf.client_id_prefix.clone(),
            keep_alive: Duration::from_secs(conf.keep_alive_secs),
        }
    }
}

pub struct MqttLink {
    client: AsyncClient,
    eventloop: EventLoop,
    routes: TopicRoutes,
    // publishes reçus pendant la poignée de main, avant le SubAck
    backlog: VecDeque<BusEvent>,
}

impl BusConnector for MqttConnector {
    type Link = MqttLink;

    async fn connect(&self, settings: &BrokerSettings) -> Result<MqttLink, RelayError> {
        let client_id = format!("{}_{}", self.client_id_prefix, OffsetDateTime::now_utc().unix_timestamp());
        let mut opts = MqttOptions::new(client_id, &settings.host, settings.port);
        opts.set_keep_alive(self.keep_alive);
        if let Some(creds) = &settings.credentials {
            debug!(username = %creds.username, "using MQTT authentication");
            opts.set_credentials(&creds.username, &creds.password);
        }

        let (client, eventloop) = AsyncClient::new(opts, 10);
        let mut link = MqttLink {
            client,
            eventloop,
            routes: settings.routes.clone(),
            backlog: VecDeque::new(),
        };
        link.handshake().await?;
        Ok(link)
    }
}

impl MqttLink {
    async fn handshake(&mut self) -> Result<(), RelayError> {
        // 1. CONNACK
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(RelayError::Connect(format!("broker refused connection: {:?}", ack.code)));
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => return Err(RelayError::Connect(e.to_string())),
            }
        }

        // 2. SUBSCRIBE sur les deux topics (QoS 1) puis attente du SUBACK
        let filters = vec![
            SubscribeFilter::new(self.routes.gps.clone(), QoS::AtLeastOnce),
            SubscribeFilter::new(self.routes.rfid.clone(), QoS::AtLeastOnce),
        ];
        self.client
            .subscribe_many(filters)
            .await
            .map_err(|e| RelayError::Subscribe(e.to_string()))?;

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                    if ack.return_codes.iter().any(|c| matches!(c, SubscribeReasonCode::Failure)) {
                        return Err(RelayError::Subscribe("broker rejected topic filter".into()));
                    }
                    return Ok(());
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    self.backlog.push_back(BusEvent::Message {
                        topic: p.topic,
                        payload: p.payload.to_vec(),
                    });
                }
                Ok(_) => {}
                Err(e) => return Err(RelayError::Subscribe(e.to_string())),
            }
        }
    }
}

impl BusLink for MqttLink {
    async fn next_event(&mut self) -> BusEvent {
        if let Some(event) = self.backlog.pop_front() {
            return event;
        }
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    return BusEvent::Message {
                        topic: p.topic,
                        payload: p.payload.to_vec(),
                    };
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    return BusEvent::Closed { reason: Some("broker sent DISCONNECT".into()) };
                }
                Ok(_) => {}
                // pas de reconnexion auto : le prochain poll() retenterait, on s'arrête ici
                Err(e) => return BusEvent::Closed { reason: Some(e.to_string()) },
            }
        }
    }

    async fn close(&mut self) {
        for topic in [self.routes.gps.clone(), self.routes.rfid.clone()] {
            if let Err(e) = self.client.unsubscribe(topic).await {
                warn!("MQTT unsubscribe failed: {e}");
            }
        }
        if let Err(e) = self.client.disconnect().await {
            warn!("MQTT disconnect request failed: {e}");
            return;
        }

        // On pousse l'event loop jusqu'à l'envoi effectif du DISCONNECT
        let drain = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(2), drain).await.is_err() {
            debug!("MQTT disconnect drain timed out");
        }
    }
}
