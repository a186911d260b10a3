use chrono::Utc;

use crate::catalog::{Course, LectureHall, Stream};
use crate::error::Result;
use crate::scheduler::assigner::Scheduler;
use crate::scheduler::job::{ActionKind, StreamAction, StreamVersion, TranscodeAction, UploadAction};

/// Outcome of one stream discovery pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub jobs_created: usize,
    /// Due streams whose course or lecture hall could not be resolved.
    pub skipped: usize,
}

impl Scheduler {
    /// Turn every due stream into one job per version its lecture hall
    /// records. Versions that already have a job are left alone.
    ///
    /// Only a failure to list due streams aborts the pass; lookup errors for a
    /// single stream are logged and that stream is skipped.
    pub async fn notify_for_streams(&self) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport::default();
        let streams = self.catalog.streams.get_due_streams(Utc::now()).await?;

        for stream in streams {
            if let Err(e) = self.catalog.streams.set_ended(stream.id, false).await {
                tracing::warn!(stream_id = stream.id, error = %e, "Could not reset ended flag");
            }

            let course = match self.catalog.courses.get_by_id(stream.course_id).await {
                Ok(course) => course,
                Err(e) => {
                    tracing::error!(stream_id = stream.id, course_id = stream.course_id, error = %e, "Course lookup failed, skipping stream");
                    report.skipped += 1;
                    continue;
                }
            };
            let hall = match self.catalog.halls.get_by_id(stream.lecture_hall_id).await {
                Ok(hall) => hall,
                Err(e) => {
                    tracing::error!(stream_id = stream.id, hall_id = stream.lecture_hall_id, error = %e, "Lecture hall lookup failed, skipping stream");
                    report.skipped += 1;
                    continue;
                }
            };

            let mut jobs = self.state.jobs.write().await;
            for &version in hall.source_mode.versions() {
                if jobs.has_job(stream.id, version) {
                    continue;
                }
                let job = jobs.create_job(
                    stream.id,
                    version,
                    stream.start,
                    stream.end,
                    pipeline(&stream, &course, &hall, version),
                );
                tracing::info!(job_id = %job.id, stream_id = stream.id, version = %version, course = %course.slug, "Job created for due stream");
                report.jobs_created += 1;
            }
        }

        Ok(report)
    }
}

/// The stream, transcode, upload sequence for one version of a lecture.
pub fn pipeline(
    stream: &Stream,
    course: &Course,
    hall: &LectureHall,
    version: StreamVersion,
) -> Vec<ActionKind> {
    let stream_name = if stream.name.is_empty() {
        format!("stream-{}", stream.id)
    } else {
        stream.name.clone()
    };

    vec![
        ActionKind::Stream(StreamAction {
            stream_id: stream.id,
            course_id: course.id,
            course_slug: course.slug.clone(),
            version,
            source_address: hall.source_for(version).to_string(),
            end: stream.end,
        }),
        ActionKind::Transcode(TranscodeAction {
            stream_id: stream.id,
            course_id: course.id,
            stream_name,
            course_name: course.name.clone(),
            version,
        }),
        ActionKind::Upload(UploadAction {
            stream_id: stream.id,
            course_id: course.id,
            version,
        }),
    ]
}
