// ============================================================================
// Schedule Resolution
// ============================================================================
//
// Joins a stop's stop times against trips running on the reference date's
// service, pins each arrival to an absolute instant, and picks the earliest
// one strictly after the reference instant.

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::feed_store::FeedStore;
use crate::gtfs_time::parse_gtfs_time;
use crate::models::ResolvedArrival;

/// All arrivals at `stop_id` strictly after `reference`, earliest first.
///
/// Only trips running on `reference`'s service day are considered. A day with
/// no active calendar yields an empty list.
pub fn upcoming_arrivals(
    store: &FeedStore,
    stop_id: &str,
    reference: NaiveDateTime,
) -> Vec<ResolvedArrival> {
    let service_date = reference.date();
    let service_id = match store.service_id_for_date(service_date) {
        Ok(service_id) => service_id,
        Err(e) => {
            info!(stop_id, error = %e, "No schedule today");
            return Vec::new();
        }
    };

    let mut arrivals: Vec<ResolvedArrival> = store
        .stop_times_for_stop(stop_id)
        .iter()
        .filter_map(|stop_time| {
            let Some(trip) = store.trip(&stop_time.trip_id) else {
                warn!(
                    trip_id = %stop_time.trip_id,
                    stop_id,
                    "Stop time references an unknown trip, ignoring it"
                );
                return None;
            };

            if trip.service_id != service_id {
                return None;
            }

            let service_time = match parse_gtfs_time(&stop_time.arrival_time) {
                Ok(service_time) => service_time,
                Err(e) => {
                    info!(
                        trip_id = %stop_time.trip_id,
                        arrival_time = %stop_time.arrival_time,
                        error = %e,
                        "Invalid arrival time in feed, ignoring it"
                    );
                    return None;
                }
            };

            let arrival_datetime = service_time.on(service_date)?;

            Some(ResolvedArrival {
                trip_id: trip.trip_id.clone(),
                route_id: trip.route_id.clone(),
                trip_headsign: trip.trip_headsign.clone(),
                arrival_time: service_time.normalized,
                arrival_datetime,
            })
        })
        .collect();

    // Stable sort: equal instants keep table order.
    arrivals.sort_by_key(|arrival| arrival.arrival_datetime);
    arrivals.retain(|arrival| arrival.arrival_datetime > reference);

    debug!(stop_id, service_id, upcoming = arrivals.len(), "Resolved arrivals");
    arrivals
}

/// Earliest arrival at `stop_id` strictly after `reference`, if any.
pub fn next_arrival(
    store: &FeedStore,
    stop_id: &str,
    reference: NaiveDateTime,
) -> Option<ResolvedArrival> {
    upcoming_arrivals(store, stop_id, reference).into_iter().next()
}
