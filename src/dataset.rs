use std::path::Path;

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use thiserror::Error;

use crate::column::{Column, ColumnData};
use crate::context::EvaluationContext;
use crate::logging::log_event;

/// Days between 0001-01-01 and the unix epoch.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to load raw data: {source}")]
    Load { source: PolarsError },
    #[error("failed to convert column `{column}`: {source}")]
    Convert { column: String, source: PolarsError },
    #[error("failed to assemble output frame: {source}")]
    Assemble { source: PolarsError },
}

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Raw input columns for one security, ready to seed an evaluation context.
#[derive(Debug, Clone, Default)]
pub struct RawDataset {
    columns: Vec<(String, Column)>,
}

impl RawDataset {
    pub fn from_csv<P: AsRef<Path>>(path: P) -> DatasetResult<Self> {
        let path_ref = path.as_ref();
        let lazy_reader = LazyCsvReader::new(path_ref)
            .has_header(true)
            .with_try_parse_dates(true)
            .with_infer_schema_length(Some(2048));

        let frame = lazy_reader
            .finish()
            .and_then(|lazy| lazy.collect())
            .map_err(|source| {
                log_event(
                    file!(),
                    "RawDataset",
                    "from_csv",
                    "dataset.load",
                    line!(),
                    &format!("Failed to load {}", path_ref.display()),
                    Some(&source.to_string()),
                );
                DatasetError::Load { source }
            })?;

        let dataset = Self::from_frame(&frame)?;

        log_event(
            file!(),
            "RawDataset",
            "from_csv",
            "dataset.load",
            line!(),
            &format!(
                "Loaded {} raw column(s) from {}",
                dataset.columns.len(),
                path_ref.display()
            ),
            None,
        );

        Ok(dataset)
    }

    /// One column per series. Integer and float series become float columns,
    /// datetimes are truncated to dates.
    pub fn from_frame(frame: &DataFrame) -> DatasetResult<Self> {
        let columns = frame
            .get_columns()
            .iter()
            .map(|series| {
                column_from_series(series)
                    .map(|column| (series.name().to_string(), column))
                    .map_err(|source| DatasetError::Convert {
                        column: series.name().to_string(),
                        source,
                    })
            })
            .collect::<DatasetResult<Vec<_>>>()?;

        Ok(Self { columns })
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, column)| column)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl IntoIterator for RawDataset {
    type Item = (String, Column);
    type IntoIter = std::vec::IntoIter<(String, Column)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

pub fn column_from_series(series: &Series) -> PolarsResult<Column> {
    let column = match series.dtype() {
        DataType::Boolean => Column::new(series.bool()?.into_iter().collect::<Vec<_>>()),
        DataType::Utf8 => Column::new(
            series
                .utf8()?
                .into_iter()
                .map(|value| value.map(str::to_owned))
                .collect::<Vec<_>>(),
        ),
        DataType::Date | DataType::Datetime(_, _) => {
            let days = series.cast(&DataType::Date)?.cast(&DataType::Int32)?;
            Column::new(
                days.i32()?
                    .into_iter()
                    .map(|value| value.and_then(date_from_epoch_days))
                    .collect::<Vec<_>>(),
            )
        }
        _ => {
            let floats = series.cast(&DataType::Float64)?;
            Column::new(floats.f64()?.into_iter().collect::<Vec<_>>())
        }
    };
    Ok(column)
}

pub fn series_from_column(name: &str, column: &Column) -> PolarsResult<Series> {
    let series = match column.data() {
        ColumnData::Float(values) => Series::new(name, values.as_slice()),
        ColumnData::Bool(values) => Series::new(name, values.as_slice()),
        ColumnData::Text(values) => Series::new(name, values.as_slice()),
        ColumnData::Date(values) => {
            let days: Vec<Option<i32>> = values
                .iter()
                .map(|value| value.map(|date| date.num_days_from_ce() - EPOCH_DAYS_FROM_CE))
                .collect();
            Series::new(name, days.as_slice()).cast(&DataType::Date)?
        }
    };
    Ok(series)
}

/// Every context entry as a series, in insertion order.
pub fn frame_from_context(context: &EvaluationContext) -> DatasetResult<DataFrame> {
    let series = context
        .iter()
        .map(|(name, column)| series_from_column(name, column))
        .collect::<PolarsResult<Vec<_>>>()
        .map_err(|source| DatasetError::Assemble { source })?;

    DataFrame::new(series).map_err(|source| DatasetError::Assemble { source })
}

fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(EPOCH_DAYS_FROM_CE)?)
}
