//! Compliance procedures run against the reference sink on virtual time.
//!
//! Every test pauses tokio's clock, so the timing windows are measured
//! deterministically instead of racing the host scheduler.

use tokio::task::JoinHandle;

use super::ComplianceScenario;
use crate::dummy::DummySink;
use crate::message::header::SpecificationRevision;
use crate::timers::testing::TokioTimer;

fn bench() -> (ComplianceScenario<TokioTimer>, JoinHandle<()>) {
    let scenario = ComplianceScenario::<TokioTimer>::new();

    let sink = DummySink::<_, _, _, TokioTimer>::new(scenario.port(), scenario.vbus(), scenario.policy())
        .expect("port initialization");
    let uut = tokio::spawn(sink.run());

    (scenario, uut)
}

#[tokio::test(start_paused = true)]
async fn bring_up_establishes_explicit_contract() {
    let (mut scenario, uut) = bench();

    scenario.bring_up_sink_uut().await.unwrap();

    uut.abort();
}

#[tokio::test(start_paused = true)]
async fn sink_capabilities_are_reported_on_request() {
    let (mut scenario, uut) = bench();

    scenario.get_sink_cap_response().await.unwrap();

    uut.abort();
}

#[tokio::test(start_paused = true)]
async fn pd2_sink_rejects_get_source_cap() {
    let (mut scenario, uut) = bench();
    scenario.set_partner_revision(SpecificationRevision::R2_0);

    scenario.get_source_cap_response().await.unwrap();

    uut.abort();
}

#[tokio::test(start_paused = true)]
async fn pd3_sink_answers_get_source_cap_with_not_supported() {
    let (mut scenario, uut) = bench();

    scenario.get_source_cap_response().await.unwrap();

    uut.abort();
}

#[tokio::test(start_paused = true)]
async fn capabilities_inside_the_wait_cap_window_avert_a_hard_reset() {
    let (mut scenario, uut) = bench();

    scenario.sink_wait_cap_deadline().await.unwrap();

    uut.abort();
}

#[tokio::test(start_paused = true)]
async fn missing_capabilities_hard_reset_within_the_wait_cap_window() {
    let (mut scenario, uut) = bench();

    scenario.sink_wait_cap_timeout().await.unwrap();

    uut.abort();
}

#[tokio::test(start_paused = true)]
async fn late_accept_inside_sender_response_completes_the_contract() {
    let (mut scenario, uut) = bench();

    scenario.sender_response_deadline().await.unwrap();

    uut.abort();
}

#[tokio::test(start_paused = true)]
async fn silent_source_hard_resets_within_sender_response() {
    let (mut scenario, uut) = bench();

    scenario.sender_response_timeout().await.unwrap();

    uut.abort();
}

#[tokio::test(start_paused = true)]
async fn missing_ps_rdy_hard_resets_within_ps_transition() {
    let (mut scenario, uut) = bench();

    scenario.ps_transition_timeout().await.unwrap();

    uut.abort();
}

#[tokio::test(start_paused = true)]
async fn replayed_message_id_is_drained_but_ignored() {
    let (mut scenario, uut) = bench();

    scenario.duplicate_message_id().await.unwrap();

    uut.abort();
}

#[tokio::test(start_paused = true)]
async fn contract_comes_back_up_after_a_partner_hard_reset() {
    let (mut scenario, uut) = bench();

    scenario.partner_hard_reset_recovery().await.unwrap();

    uut.abort();
}

#[tokio::test(start_paused = true)]
async fn pd2_partner_downgrades_the_negotiation() {
    let (mut scenario, uut) = bench();
    scenario.set_partner_revision(SpecificationRevision::R2_0);

    scenario.bring_up_sink_uut().await.unwrap();

    uut.abort();
}
