//! Macros that generate low-level boilerplate code.
//!
//! The firmware images link against the vendor CMSIS startup code, which owns
//! the reset handler and the initial vector table. The macros only provide the
//! symbols that startup code calls.

use proc_macro::TokenStream;

use quote::{format_ident, quote};
use syn::{parse_macro_input, ItemFn, Path};

/// Generates the boilerplate required to call the provided function on boot.
///
/// The attribute takes the path of the `ensemble::config::BoardConfig`
/// constant of the image. The annotated function receives the
/// `ensemble::board::BootReport` of a successful bring-up and returns the exit
/// code of `main`.
///
/// It generates:
///
/// - `MPU_Load_Regions`, called by `SystemInit` before `main`. It programs
///   and enables the MPU from the region table of the configured core. If the
///   table cannot be loaded, it enters an infinite loop.
/// - `main`, which installs the logger, runs the board bring-up sequence and
///   calls the provided function. A failed bring-up is printed and makes
///   `main` return -1.
/// - The statically allocated board resources and a panic handler.
///
/// ```text
/// #[entrypoint(ensemble_examples::BOARD_CONFIG)]
/// fn app(report: BootReport<AlifEnsemble<Volatile>>) -> i32 {
///     0
/// }
/// ```
#[proc_macro_attribute]
pub fn entrypoint(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = parse_macro_input!(attr as Path);
    let item_fn = parse_macro_input!(item as ItemFn);

    let fname_rust = &item_fn.sig.ident;
    let resources = format_ident!("_ENSEMBLE_RESOURCES_{}", fname_rust.to_string().to_uppercase());

    let tokens = quote! {
        static #resources: ensemble::board::BoardResources<ensemble::mmio::Volatile> =
            ensemble::board::BoardResources::new();

        #[no_mangle]
        extern "C" fn MPU_Load_Regions() {
            let config: ensemble::config::BoardConfig = #config;
            if ensemble::board::load_mpu_regions(ensemble::mmio::Volatile, &config).is_err() {
                loop {
                    ensemble::cpu::wfi();
                }
            }
        }

        #[no_mangle]
        extern "C" fn main() -> i32 {
            let config: ensemble::config::BoardConfig = #config;
            ensemble::print::init_logger(config.log_level);

            let board = ensemble::board::AlifEnsemble::new(ensemble::mmio::Volatile, &#resources);
            match ensemble::board::BoardInit::new(board, config).run() {
                Ok(report) => #fname_rust(report),
                Err(err) => {
                    ensemble::println!("{}", err);
                    -1
                }
            }
        }

        #[panic_handler]
        fn panic(info: &core::panic::PanicInfo) -> ! {
            ensemble::print!("\n\n!!! PANIC !!!\n\n");

            if let Some(location) = info.location() {
                ensemble::print!("{}:{}", location.file(), location.line());
            }

            ensemble::println!(": {}", info.message());

            loop {
                ensemble::cpu::wfi();
            }
        }

        #item_fn
    };

    tokens.into()
}
