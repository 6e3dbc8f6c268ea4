//! # Ponte de Análise em Lote (processo externo)
//!
//! Delega a análise morfológica a um processo auxiliar (por padrão o wrapper
//! .NET do analisador Nuve) usando um protocolo textual de linhas:
//!
//! ```text
//! stdin  →  Tarkan\nsahneye\nçıktı\n                     (um token por linha)
//! stdout ←  {"Word":"Tarkan","Analyses":[{"Stem":"Tarkan","Morphemes":[...]}]}
//!           {"Word":"sahneye","Analyses":[...]}          (um JSON por linha)
//! ```
//!
//! Só a primeira análise de cada registro (a melhor, segundo o próprio
//! analisador) é guardada. Linhas que não são JSON válido são ignoradas.
//!
//! ## Cache e falhas
//!
//! - Cada token é enviado ao processo no máximo uma vez enquanto estiver no
//!   [`LruCache`] da ponte; chamadas repetidas são acertos de cache.
//! - Qualquer falha (spawn, E/S, código de saída, timeout) vira a análise
//!   identidade para os tokens pendentes. O erro é logado, nunca propagado.
//! - O mutex do cache fica preso durante a chamada ao processo, então duas
//!   threads nunca disparam o processo para o mesmo token.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::LruCache;
use crate::config::BridgeConfig;
use crate::morphology::{MorphAnalysis, MorphAnalyzer, Morpheme, MorphemeKind, UNKNOWN_POS};

/// Falhas do transporte. Consumidas internamente pela ponte.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("falha ao iniciar `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("erro de E/S com o processo: {0}")]
    Io(#[from] std::io::Error),
    #[error("processo terminou com {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("processo excedeu o timeout de {0:?}")]
    Timeout(Duration),
}

/// Um canal capaz de trocar uma requisição (linhas) por uma resposta (linhas).
pub trait BatchTransport: Send + Sync {
    fn exchange(&self, request: &str) -> Result<String, BridgeError>;
}

/// Quanto esperar pelas threads de E/S depois de matar um processo no timeout.
const REAP_GRACE: Duration = Duration::from_millis(500);

/// Cliente que executa o processo externo uma vez por requisição, com
/// timeout e novas tentativas.
///
/// No timeout o processo é morto e as threads de E/S são aguardadas por
/// [`REAP_GRACE`]. Se um neto do processo herdou os pipes e continua vivo, as
/// threads presas nele ficam desanexadas até ele terminar.
#[derive(Debug, Clone)]
pub struct ProcessClient {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    max_retries: u32,
}

impl ProcessClient {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout(),
            max_retries: config.max_retries,
        }
    }

    fn run_once(&self, request: &str) -> Result<String, BridgeError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // stdin é escrito em outra thread: se o processo encher o pipe de
        // saída antes de ler toda a entrada, escrever aqui travaria.
        let stdin = child.stdin.take();
        let payload = request.to_owned();
        let writer = thread::spawn(move || {
            if let Some(mut pipe) = stdin {
                if let Err(e) = pipe.write_all(payload.as_bytes()) {
                    debug!("escrita no stdin interrompida: {e}");
                }
                // drop(pipe) fecha o stdin e sinaliza fim da entrada
            }
        });
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                let readers = stdout_reader.into_iter().chain(stderr_reader).collect();
                let detached = reap(vec![writer], REAP_GRACE) + reap(readers, REAP_GRACE);
                if detached > 0 {
                    warn!("ponte: {detached} threads de E/S presas em pipes de um processo neto");
                }
                return Err(BridgeError::Timeout(self.timeout));
            }
            thread::sleep(Duration::from_millis(5));
        };

        let _ = writer.join();
        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);

        if !status.success() {
            let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
            return Err(BridgeError::Exit {
                status: status.to_string(),
                stderr: tail,
            });
        }
        Ok(stdout)
    }
}

impl BatchTransport for ProcessClient {
    fn exchange(&self, request: &str) -> Result<String, BridgeError> {
        let mut attempt = 0;
        loop {
            match self.run_once(request) {
                Ok(out) => return Ok(out),
                Err(e) if attempt < self.max_retries && !matches!(e, BridgeError::Spawn { .. }) => {
                    attempt += 1;
                    warn!("ponte: tentativa {attempt} falhou ({e}); repetindo");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!("leitura do processo interrompida: {e}");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Junta as threads que terminarem dentro de `grace`; devolve quantas sobraram.
fn reap<T>(handles: Vec<thread::JoinHandle<T>>, grace: Duration) -> usize {
    let deadline = Instant::now() + grace;
    let mut pending = handles;
    loop {
        let (done, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|h| h.is_finished());
        for handle in done {
            let _ = handle.join();
        }
        pending = rest;
        if pending.is_empty() || Instant::now() >= deadline {
            return pending.len();
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

// === Formato de fio ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireRecord {
    word: Option<String>,
    #[serde(default)]
    analyses: Vec<WireAnalysis>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireAnalysis {
    stem: Option<String>,
    #[serde(default)]
    morphemes: Vec<WireMorpheme>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireMorpheme {
    id: Option<String>,
    surface: Option<String>,
    #[serde(default)]
    has_change: bool,
    #[serde(default)]
    labels: Option<Vec<String>>,
}

impl From<WireMorpheme> for Morpheme {
    fn from(w: WireMorpheme) -> Self {
        Morpheme {
            id: w.id.unwrap_or_default(),
            surface: w.surface.unwrap_or_default(),
            has_change: w.has_change,
            // MorphAnalysis::new reatribui raiz/sufixo pela posição
            kind: MorphemeKind::Suffix,
            labels: w.labels.unwrap_or_default(),
        }
    }
}

/// Interpreta a saída do processo: uma análise por palavra reconhecida.
///
/// Palavras presentes sem nenhuma análise ganham a análise identidade;
/// linhas inválidas são puladas.
pub fn parse_response(stdout: &str) -> HashMap<String, MorphAnalysis> {
    let mut parsed = HashMap::new();
    let mut skipped = 0usize;

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: WireRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        let Some(word) = record.word else {
            continue;
        };
        let analysis = match record.analyses.into_iter().next() {
            Some(best) => {
                let lemma = best.stem.unwrap_or_else(|| word.clone());
                let morphemes = best.morphemes.into_iter().map(Morpheme::from).collect();
                MorphAnalysis::new(lemma, UNKNOWN_POS, morphemes)
            }
            None => MorphAnalysis::identity(&word),
        };
        parsed.insert(word, analysis);
    }

    if skipped > 0 {
        warn!("ponte: {skipped} linha(s) de saída ignoradas (JSON inválido)");
    }
    parsed
}

/// Tokens que não podem atravessar o protocolo de linhas.
fn is_sendable(token: &str) -> bool {
    !token.trim().is_empty() && token.trim() == token && !token.contains(['\n', '\r'])
}

/// Backend morfológico que delega ao processo externo em lote.
pub struct BatchBridge<T: BatchTransport = ProcessClient> {
    transport: T,
    cache: Mutex<LruCache<String, MorphAnalysis>>,
    invocations: AtomicUsize,
}

impl BatchBridge<ProcessClient> {
    pub fn new(config: &BridgeConfig) -> Self {
        info!(
            "ponte inicializada: `{} {}` (timeout {:?}, cache {})",
            config.program,
            config.args.join(" "),
            config.timeout(),
            config.cache_capacity
        );
        Self::with_transport(ProcessClient::new(config), config.cache_capacity)
    }
}

impl<T: BatchTransport> BatchBridge<T> {
    pub fn with_transport(transport: T, cache_capacity: usize) -> Self {
        Self {
            transport,
            cache: Mutex::new(LruCache::new(cache_capacity)),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Quantas vezes o processo externo foi acionado.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    /// Aquece o cache com um lote grande (ex: todos os tokens de um corpus de
    /// treino), para que as chamadas por sentença depois sejam acertos.
    /// A garantia vale enquanto o lote couber na capacidade do cache.
    pub fn pre_analyze(&self, tokens: &[String]) -> HashMap<String, MorphAnalysis> {
        let unique: HashSet<&String> = tokens.iter().collect();
        info!("ponte: pré-analisando {} tokens únicos", unique.len());
        self.resolve(tokens)
    }

    fn lock_cache(&self) -> MutexGuard<'_, LruCache<String, MorphAnalysis>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn resolve(&self, tokens: &[String]) -> HashMap<String, MorphAnalysis> {
        let mut results: HashMap<String, MorphAnalysis> = HashMap::with_capacity(tokens.len());
        let mut cache = self.lock_cache();

        let mut seen: HashSet<&String> = HashSet::with_capacity(tokens.len());
        let mut misses: Vec<&String> = Vec::new();
        for token in tokens {
            if !seen.insert(token) {
                continue;
            }
            match cache.get(token) {
                Some(hit) => {
                    results.insert(token.clone(), hit);
                }
                None => misses.push(token),
            }
        }
        debug!(
            "ponte: {} acertos, {} faltas",
            results.len(),
            misses.len()
        );
        if misses.is_empty() {
            return results;
        }

        let request: String = misses
            .iter()
            .filter(|t| is_sendable(t))
            .map(|t| format!("{t}\n"))
            .collect();

        let mut fresh = if request.is_empty() {
            HashMap::new()
        } else {
            self.invocations.fetch_add(1, Ordering::Relaxed);
            match self.transport.exchange(&request) {
                Ok(stdout) => parse_response(&stdout),
                Err(e) => {
                    warn!("ponte: falha no processo externo ({e}); usando análise identidade");
                    HashMap::new()
                }
            }
        };

        for token in misses {
            let analysis = fresh
                .remove(token.as_str())
                .unwrap_or_else(|| MorphAnalysis::identity(token));
            cache.insert(token.clone(), analysis.clone());
            results.insert(token.clone(), analysis);
        }
        results
    }
}

impl<T: BatchTransport> MorphAnalyzer for BatchBridge<T> {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn analyze(&self, token: &str) -> MorphAnalysis {
        let token = token.to_string();
        self.resolve(std::slice::from_ref(&token))
            .remove(&token)
            .unwrap_or_else(|| MorphAnalysis::identity(&token))
    }

    fn analyze_batch(&self, tokens: &[String]) -> HashMap<String, MorphAnalysis> {
        self.resolve(tokens)
    }

    fn prefers_batch(&self) -> bool {
        true
    }

    fn warm_up(&self, tokens: &[String]) {
        self.pre_analyze(tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transporte em memória: responde com um registro por linha recebida.
    struct FakeNuve {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl FakeNuve {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new()
            }
        }
    }

    impl BatchTransport for FakeNuve {
        fn exchange(&self, request: &str) -> Result<String, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            if self.fail {
                return Err(BridgeError::Timeout(Duration::from_millis(1)));
            }
            let mut out = String::from("aviso: linha de log que não é JSON\n");
            for word in request.lines() {
                out.push_str(&format!(
                    r#"{{"Word":"{word}","Analyses":[{{"Stem":"kök","Morphemes":[{{"Id":"Noun","Surface":"kök","Type":"Root","Labels":["Prop"],"HasChange":false}},{{"Id":"Dat","Surface":"ye","Type":"Suffix","Labels":[],"HasChange":true}}]}},{{"Stem":"pior","Morphemes":[]}}]}}"#
                ));
                out.push('\n');
            }
            Ok(out)
        }
    }

    fn strings(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_parse_keeps_best_analysis() {
        let out = r#"{"Word":"sahneye","Analyses":[{"Stem":"sahne","Morphemes":[{"Id":"Noun","Surface":"sahne","Type":"Root","Labels":[],"HasChange":false},{"Id":"Dat","Surface":"ye","Type":"Suffix","Labels":["Case"],"HasChange":true}]},{"Stem":"x","Morphemes":[]}]}
isto não é json
{"Word":"qqq","Analyses":[]}"#;
        let parsed = parse_response(out);
        assert_eq!(parsed.len(), 2);
        let a = &parsed["sahneye"];
        assert_eq!(a.lemma, "sahne");
        assert_eq!(a.pos, UNKNOWN_POS);
        assert_eq!(a.morphemes.len(), 2);
        assert_eq!(a.morphemes[0].kind, MorphemeKind::Root);
        assert!(a.morphemes[1].has_change);
        assert_eq!(a.morphemes[1].labels, vec!["Case".to_string()]);
        assert!(parsed["qqq"].is_identity_of("qqq"));
    }

    #[test]
    fn test_parse_tolerates_missing_fields() {
        let parsed = parse_response(r#"{"Word":"ev","Analyses":[{"Morphemes":[{"Id":"Noun"}]}]}"#);
        assert_eq!(parsed["ev"].lemma, "ev");
        assert_eq!(parsed["ev"].morphemes[0].id, "Noun");
    }

    #[test]
    fn test_second_call_is_cache_hit() {
        let bridge = BatchBridge::with_transport(FakeNuve::new(), 100);
        let tokens = strings(&["Tarkan", "sahneye", "Tarkan"]);

        let first = bridge.analyze_batch(&tokens);
        let second = bridge.analyze_batch(&tokens);

        assert_eq!(bridge.invocations(), 1);
        assert_eq!(bridge.transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(first["Tarkan"].lemma, "kök");
        assert_eq!(bridge.cached_len(), 2);
    }

    #[test]
    fn test_concurrent_callers_share_one_invocation() {
        let bridge = BatchBridge::with_transport(FakeNuve::slow(Duration::from_millis(100)), 100);
        let tokens = strings(&["Tarkan", "sahneye", "çıktı"]);

        let results: Vec<HashMap<String, MorphAnalysis>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| bridge.analyze_batch(&tokens)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(bridge.invocations(), 1);
        assert_eq!(bridge.transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.cached_len(), 3);
        for result in &results[1..] {
            assert_eq!(result, &results[0]);
        }
        assert_eq!(results[0]["sahneye"].lemma, "kök");
    }

    #[test]
    fn test_pre_analyze_warms_cache() {
        let bridge = BatchBridge::with_transport(FakeNuve::new(), 100);
        bridge.pre_analyze(&strings(&["a", "b", "c", "a"]));
        assert_eq!(bridge.invocations(), 1);

        let a = bridge.analyze("b");
        assert_eq!(a.lemma, "kök");
        assert_eq!(bridge.invocations(), 1);
    }

    #[test]
    fn test_preprocessor_warm_up_goes_through_pre_analyze() {
        let bridge = std::sync::Arc::new(BatchBridge::with_transport(FakeNuve::new(), 100));
        let pre = crate::preprocess::Preprocessor::single(bridge.clone());
        let corpus = strings(&["Tarkan", "sahneye", "çıktı", "Tarkan"]);

        pre.warm_up(&corpus);
        assert_eq!(bridge.invocations(), 1);
        assert_eq!(bridge.cached_len(), 3);

        let out = pre.process_sentence(&strings(&["çıktı", "Tarkan"]));
        assert_eq!(out[0].lemma, "kök");
        assert_eq!(bridge.invocations(), 1);
    }

    #[test]
    fn test_transport_failure_falls_back_to_identity() {
        let bridge = BatchBridge::with_transport(
            FakeNuve {
                fail: true,
                ..FakeNuve::new()
            },
            100,
        );
        let out = bridge.analyze_batch(&strings(&["Galatasaray"]));
        assert!(out["Galatasaray"].is_identity_of("Galatasaray"));
        // O fallback também vai para o cache
        bridge.analyze("Galatasaray");
        assert_eq!(bridge.invocations(), 1);
    }

    #[test]
    fn test_unsendable_tokens_never_reach_process() {
        let bridge = BatchBridge::with_transport(FakeNuve::new(), 100);
        let out = bridge.analyze_batch(&strings(&["a\nb", " "]));
        assert_eq!(bridge.invocations(), 0);
        assert!(out["a\nb"].is_identity_of("a\nb"));
        assert!(out[" "].is_identity_of(" "));
    }

    #[cfg(unix)]
    fn shell_bridge(script: &str, timeout_ms: u64) -> BatchBridge<ProcessClient> {
        let config = BridgeConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            timeout_ms,
            max_retries: 0,
            cache_capacity: 100,
        };
        BatchBridge::new(&config)
    }

    #[cfg(unix)]
    #[test]
    fn test_real_process_round_trip() {
        let script = r#"while IFS= read -r w; do printf '{"Word":"%s","Analyses":[{"Stem":"%s","Morphemes":[{"Id":"Noun","Surface":"%s","Type":"Root","Labels":[],"HasChange":false}]}]}\n' "$w" "$w" "$w"; done"#;
        let bridge = shell_bridge(script, 10_000);
        let out = bridge.analyze_batch(&strings(&["Tarkan", "çıktı"]));
        assert_eq!(out["çıktı"].lemma, "çıktı");
        assert_eq!(out["Tarkan"].morphemes.len(), 1);
        bridge.analyze_batch(&strings(&["Tarkan", "çıktı"]));
        assert_eq!(bridge.invocations(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_malformed_output_falls_back() {
        let bridge = shell_bridge("cat", 10_000);
        let out = bridge.analyze_batch(&strings(&["Ankara"]));
        assert!(out["Ankara"].is_identity_of("Ankara"));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_falls_back() {
        let bridge = shell_bridge("cat > /dev/null; echo quebrou >&2; exit 3", 10_000);
        let a = bridge.analyze("İzmir");
        assert!(a.is_identity_of("İzmir"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_falls_back() {
        let bridge = shell_bridge("sleep 5", 200);
        let start = Instant::now();
        let a = bridge.analyze("Bursa");
        assert!(a.is_identity_of("Bursa"));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_reap_joins_finished_threads() {
        let quick = vec![thread::spawn(|| 1), thread::spawn(|| 2)];
        assert_eq!(reap(quick, Duration::from_millis(200)), 0);

        let stuck = vec![thread::spawn(|| thread::sleep(Duration::from_secs(2)))];
        let start = Instant::now();
        assert_eq!(reap(stuck, Duration::from_millis(20)), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_unreachable_program_falls_back() {
        let config = BridgeConfig {
            program: "trner-programa-que-nao-existe".to_string(),
            args: vec![],
            timeout_ms: 1_000,
            max_retries: 2,
            cache_capacity: 10,
        };
        let bridge = BatchBridge::new(&config);
        let a = bridge.analyze("Konya");
        assert!(a.is_identity_of("Konya"));
        assert_eq!(a.pos, UNKNOWN_POS);
    }
}
