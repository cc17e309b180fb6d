// sluice/examples/basic_pipeline.rs

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice::{
  ConversionFailure, ExtractionProxy, IterSource, PersistOutcome, PersistenceAdapter, Pipeline, PipelineConfig,
  SluiceResult, SourceProxy, StrategyError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

// 1. Define the item your sources produce and the entity your target stores.
#[derive(Clone, Debug)]
struct RawTemperature {
  station: &'static str,
  celsius: &'static str,
}

#[derive(Clone, Debug)]
struct Reading {
  station: String,
  kelvin: f64,
}

// 2. Define a persistence adapter for the target.
#[derive(Default)]
struct LatestReadings {
  by_station: Mutex<HashMap<String, f64>>,
}

#[async_trait]
impl PersistenceAdapter<Reading> for LatestReadings {
  async fn persist(&self, reading: &Reading) -> Result<PersistOutcome, StrategyError> {
    let previous = self.by_station.lock().insert(reading.station.clone(), reading.kelvin);
    Ok(match previous {
      None => PersistOutcome::Added,
      Some(k) if (k - reading.kelvin).abs() < f64::EPSILON => PersistOutcome::Unchanged,
      Some(_) => PersistOutcome::Modified,
    })
  }
}

#[tokio::main]
async fn main() -> SluiceResult<()> {
  // Initialize tracing (optional, for demonstration)
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Basic Pipeline Example ---");

  // 3. Create the pipeline. The queue length bounds every stage and proxy.
  let pipeline = Pipeline::<RawTemperature, Reading>::new("weather", PipelineConfig::default().with_max_queue_length(8));

  // 4. A converter is any Fn(&I) -> Result<Option<E>, StrategyError>.
  let converter = Arc::new(|raw: &RawTemperature| -> Result<Option<Reading>, StrategyError> {
    let celsius = raw
      .celsius
      .parse::<f64>()
      .map_err(|e| StrategyError::validation(format!("{}: {}", raw.station, e)))?;
    Ok(Some(Reading {
      station: raw.station.to_string(),
      kelvin: celsius + 273.15,
    }))
  });

  // 5. Each source is wrapped in a proxy.
  let north = IterSource::new(vec![
    RawTemperature { station: "north", celsius: "4.5" },
    RawTemperature { station: "north", celsius: "4.5" },
    RawTemperature { station: "north", celsius: "5.0" },
  ]);
  let south = IterSource::new(vec![
    RawTemperature { station: "south", celsius: "21.0" },
    RawTemperature { station: "south", celsius: "n/a" },
  ]);
  let proxies: Vec<Arc<dyn SourceProxy<RawTemperature>>> = vec![
    Arc::new(ExtractionProxy::new("north", north)),
    Arc::new(ExtractionProxy::new("south", south)),
  ];

  pipeline.on_conversion_failed(|failure: &ConversionFailure<RawTemperature>| {
    info!("Skipped {:?}: {}", failure.item, failure.error);
  });

  let target = Arc::new(LatestReadings::default());
  pipeline.register_components(converter, target.clone(), proxies)?;

  // 6. Run and inspect the summary.
  let summary = pipeline.run().await?;
  info!("Run finished in state {:?}", summary.state);
  info!("Counters: {:?}", summary.counters);
  info!("Latest readings: {:?}", target.by_station.lock());

  assert_eq!(summary.counters.total(), 4);
  assert_eq!(summary.conversion_failures, 1);

  info!("--- Basic Pipeline Example Finished ---");
  Ok(())
}
